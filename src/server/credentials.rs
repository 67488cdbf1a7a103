//! # Credential Document
//!
//! JSON body returned by the credentials-by-role endpoint, in the shape SDK
//! credential providers expect from the instance metadata service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::CREDENTIAL_TIME_FORMAT;
use crate::iam::CachedCredential;

const SUCCESS_CODE: &str = "Success";
const CREDENTIAL_TYPE: &str = "AWS-HMAC";

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CredentialDocument {
    pub access_key_id: String,
    pub code: String,
    pub expiration: String,
    pub last_updated: String,
    pub secret_access_key: String,
    pub token: String,
    #[serde(rename = "Type")]
    pub credential_type: String,
}

impl CredentialDocument {
    pub fn from_cached(credential: &CachedCredential, now: DateTime<Utc>) -> Self {
        let issued = &credential.credentials;
        Self {
            access_key_id: issued.access_key_id.clone(),
            code: SUCCESS_CODE.to_string(),
            expiration: issued.expiration.format(CREDENTIAL_TIME_FORMAT).to_string(),
            last_updated: now.format(CREDENTIAL_TIME_FORMAT).to_string(),
            secret_access_key: issued.secret_access_key.clone(),
            token: issued.session_token.clone(),
            credential_type: CREDENTIAL_TYPE.to_string(),
        }
    }
}

impl std::fmt::Debug for CredentialDocument {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CredentialDocument")
            .field("access_key_id", &self.access_key_id)
            .field("code", &self.code)
            .field("expiration", &self.expiration)
            .field("last_updated", &self.last_updated)
            .field("credential_type", &self.credential_type)
            .finish_non_exhaustive()
    }
}
