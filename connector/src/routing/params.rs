use crate::auth::ConnectionIdentity;
use crate::common::ConnectorError;
use crate::config::DEFAULT_TENANT_ID;
use serde::Serialize;

/// Local topic on which clients ask for the gateway parameters.
pub const PARAMS_REQUEST_TOPIC: &str = "edge/thing/request";

/// Local topic carrying the gateway parameters.
pub const PARAMS_RESPONSE_TOPIC: &str = "edge/thing/response";

const THING_NAMESPACE: &str = "azure.edge";

/// Identity of the gateway as seen by local applications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayParams {
    /// `azure.edge:<hubName>:<deviceId>`
    pub device_id: String,
    pub tenant_id: String,
    pub policy_id: String,
}

impl GatewayParams {
    /// An empty `tenant_id` falls back to [`DEFAULT_TENANT_ID`].
    pub fn new(device_id: &str, tenant_id: &str, hub_name: &str) -> Self {
        let tenant_id = if tenant_id.is_empty() {
            DEFAULT_TENANT_ID
        } else {
            tenant_id
        };

        Self {
            device_id: format!("{THING_NAMESPACE}:{hub_name}:{device_id}"),
            tenant_id: tenant_id.to_string(),
            policy_id: String::new(),
        }
    }

    pub fn for_identity(identity: &ConnectionIdentity, tenant_id: &str) -> Self {
        Self::new(&identity.device_id, tenant_id, &identity.hub_name)
    }

    pub fn to_payload(&self) -> Result<Vec<u8>, ConnectorError> {
        serde_json::to_vec(self).map_err(|e| ConnectorError::Transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_custom_tenant() {
        let params = GatewayParams::new("dummy-device", "dummy-tenant", "dummy-hub");
        assert_eq!(params.device_id, "azure.edge:dummy-hub:dummy-device");
        assert_eq!(params.tenant_id, "dummy-tenant");
        assert_eq!(params.policy_id, "");
    }

    #[test]
    fn test_default_tenant() {
        let params = GatewayParams::new("dummy-device", "", "dummy-hub");
        assert_eq!(params.device_id, "azure.edge:dummy-hub:dummy-device");
        assert_eq!(params.tenant_id, "defaultTenant");
        assert_eq!(params.policy_id, "");
    }

    #[test]
    fn test_payload_from_identity() {
        let identity = ConnectionIdentity {
            device_id: "dummy-device".to_string(),
            hub_name: "dummy-hub".to_string(),
            ..Default::default()
        };
        let payload = GatewayParams::for_identity(&identity, "dummy-tenant")
            .to_payload()
            .unwrap();
        assert_eq!(
            String::from_utf8(payload).unwrap(),
            r#"{"deviceId":"azure.edge:dummy-hub:dummy-device","tenantId":"dummy-tenant","policyId":""}"#
        );
    }
}
