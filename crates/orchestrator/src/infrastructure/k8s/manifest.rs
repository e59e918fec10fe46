//! Pure translation of validated specs into Kubernetes manifests.
//!
//! Nothing here talks to the API server. The only link between a service and its
//! pod is the `app=<pod name>` label set on the pod and used as the service selector.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Container;
use k8s_openapi::api::core::v1::ContainerPort;
use k8s_openapi::api::core::v1::EnvVar;
use k8s_openapi::api::core::v1::EnvVarSource;
use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::PodSpec as K8sPodSpec;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::core::v1::SecretKeySelector;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::api::core::v1::ServicePort;
use k8s_openapi::api::core::v1::ServiceSpec as K8sServiceSpec;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;

use crate::domain::cluster::Credentials;
use crate::domain::spec::EnvBinding;
use crate::domain::spec::EnvSource;
use crate::domain::spec::PodSpec;
use crate::domain::spec::ServiceSpec;

pub const SELECTOR_LABEL: &str = "app";
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY: &str = "massa-test-framework";

const PROTOCOL_TCP: &str = "TCP";
const SERVICE_TYPE_NODE_PORT: &str = "NodePort";
const IMAGE_PULL_ALWAYS: &str = "Always";
const SECRET_TYPE_OPAQUE: &str = "Opaque";

/// Labels on a pod that its service selects on.
pub fn selector_labels(pod_name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(SELECTOR_LABEL.to_string(), pod_name.to_string())])
}

fn managed_labels() -> BTreeMap<String, String> {
    BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY.to_string())])
}

pub fn namespace(name: &str) -> Namespace {
    Namespace {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Opaque secret holding the SSH credentials under the keys the image reads.
pub fn credentials_secret(namespace: &str, credentials: &Credentials) -> Secret {
    let data = credentials
        .secret_entries()
        .into_iter()
        .map(|(key, value)| (key.to_string(), ByteString(value.into_bytes())))
        .collect();

    Secret {
        metadata: ObjectMeta {
            name: Some(credentials.secret_name.clone()),
            namespace: Some(namespace.to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        type_: Some(SECRET_TYPE_OPAQUE.to_string()),
        data: Some(data),
        ..Default::default()
    }
}

fn env_var(binding: &EnvBinding) -> EnvVar {
    match &binding.source {
        EnvSource::Literal(value) => EnvVar {
            name: binding.name.clone(),
            value: Some(value.clone()),
            ..Default::default()
        },
        EnvSource::SecretKey { secret, key } => EnvVar {
            name: binding.name.clone(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: Some(secret.clone()),
                    key: key.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    }
}

pub fn pod(spec: &PodSpec) -> Pod {
    let ports = spec
        .ports()
        .iter()
        .map(|port| ContainerPort {
            name: Some(port.name.clone()),
            container_port: i32::from(port.container_port),
            protocol: Some(PROTOCOL_TCP.to_string()),
            ..Default::default()
        })
        .collect();

    let env: Vec<EnvVar> = spec.env().iter().map(env_var).collect();

    let container = Container {
        name: spec.container_name().to_string(),
        image: Some(spec.image().to_string()),
        image_pull_policy: Some(IMAGE_PULL_ALWAYS.to_string()),
        ports: Some(ports),
        env: (!env.is_empty()).then_some(env),
        ..Default::default()
    };

    let mut labels = managed_labels();
    labels.extend(selector_labels(spec.name()));

    Pod {
        metadata: ObjectMeta {
            name: Some(spec.name().to_string()),
            namespace: Some(spec.namespace().to_string()),
            labels: Some(labels),
            ..Default::default()
        },
        spec: Some(K8sPodSpec {
            containers: vec![container],
            ..Default::default()
        }),
        ..Default::default()
    }
}

pub fn service(spec: &ServiceSpec) -> Service {
    let ports = spec
        .ports()
        .iter()
        .map(|port| ServicePort {
            name: Some(port.name.clone()),
            port: i32::from(port.port),
            target_port: Some(IntOrString::Int(i32::from(port.target_port))),
            node_port: port.node_port.map(i32::from),
            protocol: Some(PROTOCOL_TCP.to_string()),
            ..Default::default()
        })
        .collect();

    Service {
        metadata: ObjectMeta {
            name: Some(spec.name().to_string()),
            namespace: Some(spec.namespace().to_string()),
            labels: Some(managed_labels()),
            ..Default::default()
        },
        spec: Some(K8sServiceSpec {
            type_: Some(SERVICE_TYPE_NODE_PORT.to_string()),
            selector: Some(selector_labels(spec.pod().name())),
            ports: Some(ports),
            external_ips: Some(spec.external_ips().to_vec()),
            ..Default::default()
        }),
        ..Default::default()
    }
}
