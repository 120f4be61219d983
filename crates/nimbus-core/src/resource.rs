//! Resource identity.

use crate::error::CoreError;
use crate::request::AccountRef;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Uniquely identifies one cloud object. Used as the graph node key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub service: String,
    pub resource_type: String,
    pub identifier: String,
    /// Empty for global resources (IAM, for example).
    #[serde(default)]
    pub region: String,
    pub account: AccountRef,
}

impl ResourceRef {
    pub fn new(
        service: impl Into<String>,
        resource_type: impl Into<String>,
        identifier: impl Into<String>,
        region: impl Into<String>,
        account: AccountRef,
    ) -> Self {
        Self {
            service: service.into(),
            resource_type: resource_type.into(),
            identifier: identifier.into(),
            region: region.into(),
            account,
        }
    }

    /// Parse `arn:partition:service:region:account:type/id` (or `type:id`).
    ///
    /// The account in the ARN wins over `fallback_account` when present.
    pub fn from_arn(arn: &str, fallback_account: &AccountRef) -> Result<Self, CoreError> {
        let parts: Vec<&str> = arn.splitn(6, ':').collect();
        if parts.len() < 6 || parts[0] != "arn" || parts[2].is_empty() {
            return Err(CoreError::MalformedArn(arn.to_string()));
        }

        let service = parts[2];
        let region = parts[3];
        let account = if parts[4].is_empty() {
            fallback_account.clone()
        } else {
            AccountRef {
                account_id: parts[4].to_string(),
                profile: fallback_account.profile.clone(),
            }
        };

        let resource = parts[5];
        let (resource_type, identifier) = match resource.split_once('/') {
            Some((kind, id)) => (kind, id),
            None => match resource.split_once(':') {
                Some((kind, id)) => (kind, id),
                // S3 bucket ARNs carry only the name.
                None => (default_type_for(service), resource),
            },
        };

        Ok(Self::new(service, resource_type, identifier, region, account))
    }

    /// Short display key: `service:type/identifier`.
    pub fn short(&self) -> String {
        format!("{}:{}/{}", self.service, self.resource_type, self.identifier)
    }
}

fn default_type_for(service: &str) -> &'static str {
    match service {
        "s3" => "bucket",
        "sqs" => "queue",
        "sns" => "topic",
        _ => "resource",
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.region.is_empty() {
            write!(f, "{} [{}]", self.short(), self.account)
        } else {
            write!(f, "{} [{} / {}]", self.short(), self.region, self.account)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_arn_with_slash() {
        let account = AccountRef::new("000000000000");
        let r = ResourceRef::from_arn("arn:aws:iam::123456789012:role/app-role", &account).unwrap();
        assert_eq!(r.service, "iam");
        assert_eq!(r.resource_type, "role");
        assert_eq!(r.identifier, "app-role");
        assert_eq!(r.region, "");
        assert_eq!(r.account.account_id, "123456789012");
    }

    #[test]
    fn test_from_arn_with_colon_and_bucket() {
        let account = AccountRef::new("111111111111");
        let f = ResourceRef::from_arn(
            "arn:aws:lambda:us-east-1:111111111111:function:worker",
            &account,
        )
        .unwrap();
        assert_eq!(f.resource_type, "function");
        assert_eq!(f.identifier, "worker");

        let b = ResourceRef::from_arn("arn:aws:s3:::assets", &account).unwrap();
        assert_eq!(b.resource_type, "bucket");
        assert_eq!(b.identifier, "assets");
        assert_eq!(b.account, account);
    }

    #[test]
    fn test_from_arn_rejects_garbage() {
        let account = AccountRef::new("1");
        assert!(ResourceRef::from_arn("not-an-arn", &account).is_err());
        assert!(ResourceRef::from_arn("arn:aws::us-east-1:1:x", &account).is_err());
    }
}
