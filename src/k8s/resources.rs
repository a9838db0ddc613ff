use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, DeploymentStrategy};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, ExecAction, Lifecycle, LifecycleHandler,
    PersistentVolumeClaim, PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource,
    PodSpec, PodTemplateSpec, Service, ServicePort, ServiceSpec, Volume, VolumeMount,
    VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;

use crate::config::KubernetesConfig;
use crate::constants::{console, game, labels};
use crate::domain::ResourceNames;

#[must_use]
pub fn object_labels(workload: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        (labels::APP.to_string(), workload.to_string()),
        (
            labels::CREATED_BY.to_string(),
            labels::CREATED_BY_VALUE.to_string(),
        ),
    ])
}

fn selector_labels(workload: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(labels::APP.to_string(), workload.to_string())])
}

/// Base environment with caller overrides applied on top, sorted by name.
#[must_use]
pub fn merged_env(overrides: &BTreeMap<String, String>) -> Vec<EnvVar> {
    let mut env: BTreeMap<String, String> = game::BASE_ENV
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect();
    env.extend(overrides.iter().map(|(k, v)| (k.clone(), v.clone())));

    env.into_iter()
        .map(|(name, value)| EnvVar {
            name,
            value: Some(value),
            ..Default::default()
        })
        .collect()
}

#[must_use]
pub fn volume_claim(names: &ResourceNames, config: &KubernetesConfig) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: ObjectMeta {
            name: Some(names.volume_claim.clone()),
            labels: Some(object_labels(&names.workload)),
            ..Default::default()
        },
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(config.storage_size.clone()),
                )])),
                ..Default::default()
            }),
            storage_class_name: config.storage_class.clone(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[must_use]
pub fn deployment(
    names: &ResourceNames,
    config: &KubernetesConfig,
    env_overrides: &BTreeMap<String, String>,
) -> Deployment {
    let container = Container {
        name: game::CONTAINER_NAME.to_string(),
        image: Some(config.image.clone()),
        env: Some(merged_env(env_overrides)),
        ports: Some(vec![ContainerPort {
            container_port: game::PORT,
            protocol: Some("TCP".to_string()),
            ..Default::default()
        }]),
        volume_mounts: Some(vec![VolumeMount {
            name: game::VOLUME_NAME.to_string(),
            mount_path: game::DATA_PATH.to_string(),
            ..Default::default()
        }]),
        lifecycle: Some(Lifecycle {
            pre_stop: Some(LifecycleHandler {
                exec: Some(ExecAction {
                    command: Some(
                        console::SHELL
                            .iter()
                            .map(|s| (*s).to_string())
                            .chain(std::iter::once(console::PRE_STOP.to_string()))
                            .collect(),
                    ),
                }),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    };

    Deployment {
        metadata: ObjectMeta {
            name: Some(names.workload.clone()),
            labels: Some(object_labels(&names.workload)),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(config.default_replicas),
            strategy: Some(DeploymentStrategy {
                type_: Some("Recreate".to_string()),
                ..Default::default()
            }),
            selector: LabelSelector {
                match_labels: Some(selector_labels(&names.workload)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(selector_labels(&names.workload)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![container],
                    volumes: Some(vec![Volume {
                        name: game::VOLUME_NAME.to_string(),
                        persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                            claim_name: names.volume_claim.clone(),
                            ..Default::default()
                        }),
                        ..Default::default()
                    }]),
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

#[must_use]
pub fn service(
    names: &ResourceNames,
    service_type: &str,
    port: i32,
    annotations: BTreeMap<String, String>,
) -> Service {
    Service {
        metadata: ObjectMeta {
            name: Some(names.service.clone()),
            labels: Some(object_labels(&names.workload)),
            annotations: (!annotations.is_empty()).then_some(annotations),
            ..Default::default()
        },
        spec: Some(ServiceSpec {
            type_: Some(service_type.to_string()),
            selector: Some(selector_labels(&names.workload)),
            ports: Some(vec![ServicePort {
                name: Some(game::PORT_NAME.to_string()),
                port,
                target_port: Some(IntOrString::Int(game::PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Desired replica count, zero when unset.
#[must_use]
pub fn desired_replicas(deployment: &Deployment) -> i32 {
    deployment
        .spec
        .as_ref()
        .and_then(|s| s.replicas)
        .unwrap_or(0)
}
