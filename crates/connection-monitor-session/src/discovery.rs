//! Token-based cloud member discovery.

use serde::Deserialize;

use crate::config::Discovery;

#[derive(Debug, Deserialize)]
struct DiscoveredMember {
    #[serde(rename = "public-address")]
    public_address: String,
}

/// Ask the discovery endpoint for the cluster's member addresses.
///
/// # Errors
/// Returns the underlying HTTP error; a 4xx here means the token is bad
/// and retrying is pointless.
pub async fn discover_members(discovery: &Discovery) -> Result<Vec<String>, reqwest::Error> {
    let url = format!(
        "{}/cluster/discovery?token={}",
        discovery.endpoint, discovery.token
    );
    let members: Vec<DiscoveredMember> = reqwest::Client::new()
        .get(&url)
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    Ok(members
        .into_iter()
        .map(|member| member.public_address)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_list_decodes() {
        let raw = r#"[
            {"private-address": "10.0.0.1:5701", "public-address": "35.1.2.3:30000"},
            {"private-address": "10.0.0.2:5701", "public-address": "35.1.2.4:30001"}
        ]"#;
        let members: Vec<DiscoveredMember> = serde_json::from_str(raw).unwrap();
        let addresses: Vec<_> = members.into_iter().map(|m| m.public_address).collect();
        assert_eq!(addresses, ["35.1.2.3:30000", "35.1.2.4:30001"]);
    }
}
