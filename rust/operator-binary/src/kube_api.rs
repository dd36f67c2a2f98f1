//! The narrow slice of the Kubernetes API the reconcile engine consumes: get, create and replace of
//! namespaced objects.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use stackable_operator::{
    k8s_openapi::NamespaceResourceScope,
    kube::{
        self,
        api::{Api, PostParams},
        Resource,
    },
};

/// Any namespaced Kubernetes object with a static type.
pub trait NamespacedObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> NamespacedObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ObjectApi: Send + Sync {
    /// Fetches an object, mapping "not found" to `None`.
    async fn get<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, kube::Error>;

    async fn create<K: NamespacedObject>(&self, namespace: &str, obj: &K)
        -> Result<K, kube::Error>;

    /// Replaces an object. A `resourceVersion` on `obj` makes this an optimistic-concurrency write.
    async fn replace<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        obj: &K,
    ) -> Result<K, kube::Error>;
}

/// [`ObjectApi`] backed by a live API server.
#[derive(Clone)]
pub struct KubeApi {
    client: kube::Client,
}

impl KubeApi {
    pub fn new(client: kube::Client) -> Self {
        Self { client }
    }

    fn api<K: NamespacedObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ObjectApi for KubeApi {
    async fn get<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        self.api::<K>(namespace).get_opt(name).await
    }

    async fn create<K: NamespacedObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, kube::Error> {
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await
    }

    async fn replace<K: NamespacedObject>(
        &self,
        namespace: &str,
        name: &str,
        obj: &K,
    ) -> Result<K, kube::Error> {
        self.api::<K>(namespace)
            .replace(name, &PostParams::default(), obj)
            .await
    }
}
