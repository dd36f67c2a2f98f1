//! Structural checks on configuration files before anything is written to the cluster.
//!
//! File names are classified by a fixed table. Only XML files are actually checked for
//! well-formedness; properties, shell and text files are accepted as they are, and file names
//! missing from the table are passed through unvalidated.

use roxmltree::{Document, ParsingOptions};
use snafu::{ResultExt, Snafu};
use strum::Display;

use hbase_k8s_crd::HbaseClusterConfiguration;

use super::{
    CORE_SITE_XML, HADOOP_ENV_SH, HBASE_ENV_SH, HBASE_POLICY_XML, HBASE_SITE_XML, HDFS_SITE_XML,
};

#[derive(Snafu, Debug)]
pub enum Error {
    #[snafu(display("configuration file [{file}] is not well-formed XML"))]
    InvalidXml {
        source: roxmltree::Error,
        file: String,
    },
}

#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum FileKind {
    Xml,
    Properties,
    Shell,
    Text,
}

/// The content type of a known configuration file, `None` for unknown file names.
pub fn file_kind(file: &str) -> Option<FileKind> {
    let kind = match file {
        HBASE_SITE_XML | HBASE_POLICY_XML | CORE_SITE_XML | HDFS_SITE_XML => FileKind::Xml,
        "configuration.xsl" | "hadoop-policy.xml" | "httpfs-site.xml" | "kms-acls.xml"
        | "kms-site.xml" => FileKind::Xml,
        "log4j.properties"
        | "log4j2.properties"
        | "hadoop-metrics2-hbase.properties"
        | "hadoop-metrics2.properties"
        | "hadoop-metrics.properties"
        | "httpfs-log4j.properties"
        | "kms-log4j.properties" => FileKind::Properties,
        HBASE_ENV_SH | HADOOP_ENV_SH => FileKind::Shell,
        "httpfs-signature.secret" | "dfs.exclude" | "dfs.include" => FileKind::Text,
        _ => return None,
    };
    Some(kind)
}

/// Checks every base HBase and Hadoop file. The first malformed XML file fails the whole
/// configuration.
pub fn validate_configuration(configuration: &HbaseClusterConfiguration) -> Result<(), Error> {
    for (file, content) in configuration.base_files() {
        validate_file(file, content)?;
    }
    Ok(())
}

fn validate_file(file: &str, content: &str) -> Result<(), Error> {
    if file_kind(file) == Some(FileKind::Xml) {
        // Hadoop files routinely carry a DOCTYPE
        let options = ParsingOptions {
            allow_dtd: true,
            ..ParsingOptions::default()
        };
        Document::parse_with_options(content, options).context(InvalidXmlSnafu { file })?;
    }
    Ok(())
}
