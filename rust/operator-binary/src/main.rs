use std::{sync::Arc, time::Duration};

use clap::Parser;
use futures::StreamExt;
use hbase_k8s_crd::{HbaseCluster, HbaseStandalone, HbaseTenant, APP_NAME};
use stackable_operator::{
    cli::{Command, ProductOperatorRun},
    client::Client,
    k8s_openapi::api::{
        apps::v1::StatefulSet,
        core::v1::{ConfigMap, Service},
        policy::v1::PodDisruptionBudget,
    },
    kube::runtime::{controller, watcher, Controller},
    logging::controller::report_controller_reconciled,
    namespace::WatchNamespace,
    CustomResourceExt,
};

use crate::{
    hash_store::{ChangeDetection, HashStore},
    hbase_controller::{
        Ctx, ErrorBackoff, HBASE_CLUSTER_CONTROLLER_NAME, HBASE_STANDALONE_CONTROLLER_NAME,
        HBASE_TENANT_CONTROLLER_NAME,
    },
    kube_api::KubeApi,
    resource::HbaseResource,
};

mod apply;
mod config;
mod config_map;
mod engine;
mod events;
mod hash_store;
mod hbase_controller;
mod kube_api;
mod operations;
mod resource;
mod service;
mod statefulset;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

const OPERATOR_NAME: &str = "hbase.kvstore.flipkart.com";

#[derive(Parser)]
#[clap(about, author)]
struct Opts {
    #[clap(subcommand)]
    cmd: Command<HbaseOperatorRun>,
}

#[derive(clap::Args)]
struct HbaseOperatorRun {
    #[clap(flatten)]
    common: ProductOperatorRun,

    /// Upper bound of resources reconciled at the same time, per resource kind.
    #[arg(long, env, default_value_t = 16)]
    max_concurrent_reconciles: u16,

    /// Whether an unchanged desired object is still pushed to the API server.
    #[arg(long, env, value_enum, default_value_t = ChangeDetection::Cached)]
    change_detection: ChangeDetection,

    #[arg(long, env, default_value_t = 5)]
    error_backoff_base_seconds: u64,

    #[arg(long, env, default_value_t = 300)]
    error_backoff_max_seconds: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let opts = Opts::parse();
    match opts.cmd {
        Command::Crd => {
            HbaseCluster::print_yaml_schema(built_info::PKG_VERSION)?;
            HbaseTenant::print_yaml_schema(built_info::PKG_VERSION)?;
            HbaseStandalone::print_yaml_schema(built_info::PKG_VERSION)?;
        }
        Command::Run(HbaseOperatorRun {
            common:
                ProductOperatorRun {
                    watch_namespace,
                    tracing_target,
                    ..
                },
            max_concurrent_reconciles,
            change_detection,
            error_backoff_base_seconds,
            error_backoff_max_seconds,
        }) => {
            stackable_operator::logging::initialize_logging(
                "HBASE_OPERATOR_LOG",
                APP_NAME,
                tracing_target,
            );
            stackable_operator::utils::print_startup_string(
                built_info::PKG_DESCRIPTION,
                built_info::PKG_VERSION,
                built_info::GIT_VERSION,
                built_info::TARGET,
                built_info::BUILT_TIME_UTC,
                built_info::RUSTC_VERSION,
            );
            let client =
                stackable_operator::client::initialize_operator(Some(OPERATOR_NAME.to_string()))
                    .await?;

            tracing::info!(
                %change_detection,
                max_concurrent_reconciles,
                error_backoff_base_seconds,
                error_backoff_max_seconds,
                "starting controllers"
            );
            let ctx = Arc::new(Ctx {
                api: KubeApi::new(client.as_kube_client()),
                hashes: HashStore::new(change_detection),
                backoff: ErrorBackoff::new(
                    Duration::from_secs(error_backoff_base_seconds),
                    Duration::from_secs(error_backoff_max_seconds),
                ),
            });

            futures::future::join3(
                run_controller::<HbaseCluster>(
                    &client,
                    &watch_namespace,
                    ctx.clone(),
                    HBASE_CLUSTER_CONTROLLER_NAME,
                    max_concurrent_reconciles,
                ),
                run_controller::<HbaseTenant>(
                    &client,
                    &watch_namespace,
                    ctx.clone(),
                    HBASE_TENANT_CONTROLLER_NAME,
                    max_concurrent_reconciles,
                ),
                run_controller::<HbaseStandalone>(
                    &client,
                    &watch_namespace,
                    ctx,
                    HBASE_STANDALONE_CONTROLLER_NAME,
                    max_concurrent_reconciles,
                ),
            )
            .await;
        }
    }

    Ok(())
}

/// Runs the controller for one resource kind until shutdown.
///
/// Every kind owns the same set of objects, so a change to any of them triggers a reconcile of
/// the resource that owns it.
async fn run_controller<K: HbaseResource>(
    client: &Client,
    watch_namespace: &WatchNamespace,
    ctx: Arc<Ctx>,
    controller_name: &str,
    concurrency: u16,
) {
    let full_controller_name = format!("{controller_name}.{OPERATOR_NAME}");
    Controller::new(
        watch_namespace.get_api::<K>(client),
        watcher::Config::default(),
    )
    .owns(
        watch_namespace.get_api::<Service>(client),
        watcher::Config::default(),
    )
    .owns(
        watch_namespace.get_api::<ConfigMap>(client),
        watcher::Config::default(),
    )
    .owns(
        watch_namespace.get_api::<StatefulSet>(client),
        watcher::Config::default(),
    )
    .owns(
        watch_namespace.get_api::<PodDisruptionBudget>(client),
        watcher::Config::default(),
    )
    .with_config(controller::Config::default().concurrency(concurrency))
    .shutdown_on_signal()
    .run(
        hbase_controller::reconcile::<K>,
        hbase_controller::error_policy::<K>,
        ctx,
    )
    .map(|res| report_controller_reconciled(client, &full_controller_name, &res))
    .collect::<()>()
    .await;
}
