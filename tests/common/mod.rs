//! Shared fixtures for the metadata surface tests

#![allow(dead_code, reason = "Not every test binary uses every fixture")]

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::extract::connect_info::MockConnectInfo;
use axum::http::{HeaderMap, Method, Request, StatusCode};
use axum::Router;
use chrono::Utc;
use k8s_openapi::api::core::v1::{Pod, PodSpec, PodStatus};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::ObjectMeta;
use tower::ServiceExt;

use kube_iam_broker::config::BrokerConfig;
use kube_iam_broker::iam::{
    AssumeRoleRequest, CredentialBroker, IssuedCredentials, RoleResolver, StsClient,
};
use kube_iam_broker::server::{router, AppState, MetadataProxy};
use kube_iam_broker::store::{MemoryIdentityStore, PodIdentityCache};
use kube_iam_broker::BrokerError;

pub const BASE: &str = "arn:aws:iam::123456789012:role/";

/// STS stand-in recording every request
#[derive(Debug, Default)]
pub struct FakeSts {
    pub requests: Mutex<Vec<AssumeRoleRequest>>,
    pub fail_with: Option<String>,
}

#[async_trait]
impl StsClient for FakeSts {
    fn endpoint(&self) -> &str {
        "https://sts.fake"
    }

    async fn assume_role(
        &self,
        request: AssumeRoleRequest,
    ) -> Result<IssuedCredentials, BrokerError> {
        self.requests.lock().unwrap().push(request.clone());
        if let Some(reason) = &self.fail_with {
            return Err(BrokerError::UpstreamCredential(reason.clone()));
        }
        Ok(IssuedCredentials {
            access_key_id: "ASIAFAKE".to_string(),
            secret_access_key: "secret".to_string(),
            session_token: format!("token-{}", request.session_name),
            expiration: Utc::now() + chrono::Duration::seconds(900),
        })
    }
}

/// Everything a router test needs
pub struct Harness {
    pub cache: PodIdentityCache,
    pub sts: Arc<FakeSts>,
    pub state: AppState,
}

impl Harness {
    pub fn new(config: &BrokerConfig, sts: FakeSts) -> Self {
        let cache = PodIdentityCache::new(Arc::new(MemoryIdentityStore::new()));
        let sts = Arc::new(sts);
        let state = AppState {
            resolver: RoleResolver::new(cache.clone(), config),
            broker: Arc::new(CredentialBroker::new(Arc::clone(&sts) as Arc<dyn StsClient>)),
            proxy: MetadataProxy::new(&config.metadata_address).unwrap(),
            session_ttl: config.session_ttl,
        };
        Self { cache, sts, state }
    }

    /// Send one request to the router as if it came from `caller`
    pub async fn call(
        &self,
        method: Method,
        uri: &str,
        caller: [u8; 4],
        headers: &[(&str, &str)],
    ) -> (StatusCode, HeaderMap, String) {
        let app: Router = router(self.state.clone())
            .layer(MockConnectInfo(SocketAddr::from((caller, 40123))));

        let mut request = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            request = request.header(*name, *value);
        }
        let response = app
            .oneshot(request.body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, headers, String::from_utf8(body.to_vec()).unwrap())
    }
}

pub fn base_config() -> BrokerConfig {
    BrokerConfig {
        base_role_arn: BASE.to_string(),
        ..BrokerConfig::default()
    }
}

/// Running pod with an optional role annotation
pub fn running_pod(uid: &str, ip: &str, namespace: &str, role: Option<&str>) -> Pod {
    Pod {
        metadata: ObjectMeta {
            name: Some(format!("pod-{uid}")),
            namespace: Some(namespace.to_string()),
            uid: Some(uid.to_string()),
            annotations: role.map(|role| {
                BTreeMap::from([("iam.amazonaws.com/role".to_string(), role.to_string())])
            }),
            ..ObjectMeta::default()
        },
        spec: Some(PodSpec::default()),
        status: Some(PodStatus {
            pod_ip: Some(ip.to_string()),
            phase: Some("Running".to_string()),
            ..PodStatus::default()
        }),
    }
}
