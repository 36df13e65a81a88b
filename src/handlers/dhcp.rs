//! Webhooks called by the external DHCP server.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    Json,
};
use serde_json::{json, Value};
use std::sync::Arc;

use super::{parse_body, ApiError};
use crate::models::*;
use crate::net::{overlaps, parse_cidr, Cidr};
use crate::utils::{canonical_mac, dhcp_arch_name, mac_vendor};
use crate::AppState;

const OPTION_HOSTNAME: u32 = 12;
const OPTION_BOOTFILE: u32 = 67;
const OPTION_CLIENT_ARCH: u32 = 93;

fn check_mac(mac: &str) -> Result<String, ApiError> {
    canonical_mac(mac).ok_or_else(|| ApiError::bad_request(format!("invalid MAC address: {}", mac)))
}

async fn interface_for(state: &AppState, mac: &str) -> Result<Interface, ApiError> {
    state
        .networks
        .get_interface_by_mac(mac)
        .await?
        .ok_or_else(|| ApiError::not_found("Interface"))
}

/// GET /ipv4?hwaddr= - boot parameters for a known interface.
///
/// Only a reserved address is advertised; statically addressed interfaces
/// configure themselves.
pub async fn offer(
    State(state): State<Arc<AppState>>,
    Query(query): Query<OfferQuery>,
) -> Result<Json<OfferResponse>, ApiError> {
    let hwaddr = query
        .hwaddr
        .filter(|h| !h.trim().is_empty())
        .ok_or_else(|| ApiError::bad_request("hwaddr is required"))?;

    // a malformed hwaddr cannot belong to any interface
    let mac = canonical_mac(&hwaddr).ok_or_else(|| ApiError::not_found("Interface"))?;
    let interface = interface_for(&state, &mac).await?;
    let machine = state
        .store
        .get_machine(interface.machine_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Machine"))?;

    let mut resp = OfferResponse::default();
    if machine.netboot_enabled {
        let bootfile = machine
            .bootfile
            .clone()
            .unwrap_or_else(|| state.config.default_bootfile.clone());
        resp.next_server = Some(state.config.tftp_proxy_host.clone());
        resp.options.push(OfferOption {
            option: OPTION_BOOTFILE,
            value: bootfile,
        });
    }
    if interface.static_ipv4.is_none() {
        resp.ipv4 = interface.reserved_ipv4.clone();
    }

    tracing::debug!("Offer for {} ({}): {:?}", interface.mac, machine.name, resp);
    Ok(Json(resp))
}

/// POST /ipv4/lease - record the address the DHCP server handed out
pub async fn lease(State(state): State<Arc<AppState>>, body: Bytes) -> Result<StatusCode, ApiError> {
    let req: LeaseRequest = parse_body(&body)?;
    let mac = check_mac(&req.mac)?;

    state
        .store
        .upsert_lease(&mac, &req.ipv4.to_string(), i64::from(req.duration))
        .await?;
    tracing::info!("Lease {} -> {} ({}s)", mac, req.ipv4, req.duration);
    Ok(StatusCode::CREATED)
}

/// Fold the interesting request options into discovery facts. A repeated
/// option keeps its last value.
fn discovery_info(mac: &str, options: &[SeenOption]) -> DiscoveryInfo {
    let last = |code: u32| options.iter().rev().find(|o| o.option == code).map(|o| o.value.clone());

    let mut info = DiscoveryInfo {
        mac_vendor: mac_vendor(mac).to_string(),
        hostname: last(OPTION_HOSTNAME),
        ..Default::default()
    };
    if let Some(code) = last(OPTION_CLIENT_ARCH) {
        let arch = match &code {
            DhcpOptionValue::Int(n) => dhcp_arch_name(*n),
            DhcpOptionValue::Text(_) => "unknown",
        };
        info.arch = Some(arch.to_string());
        info.arch_code = Some(code);
    }
    info
}

/// POST /ipv4/seen - 200 for known interfaces, 202 after recording an unknown MAC
pub async fn seen(State(state): State<Arc<AppState>>, body: Bytes) -> Result<StatusCode, ApiError> {
    let req: SeenRequest = parse_body(&body)?;
    let mac = check_mac(&req.mac)?;

    if let Some(interface) = state.networks.get_interface_by_mac(&mac).await? {
        tracing::info!(
            machine_id = interface.machine_id,
            interface_id = interface.id,
            mac = %mac,
            discover = req.discover,
            "DHCP traffic from known interface"
        );
        return Ok(StatusCode::OK);
    }

    let info = discovery_info(&mac, &req.options);
    state.store.upsert_discovered_mac(&mac, &info).await?;
    tracing::info!("Discovered unknown MAC {} ({})", mac, info.mac_vendor);
    Ok(StatusCode::ACCEPTED)
}

/// POST /ipv4/subnet - pick the DHCP subnet whose pool serves the
/// interface's reserved range
pub async fn subnet(State(state): State<Arc<AppState>>, body: Bytes) -> Result<Json<Value>, ApiError> {
    let req: SubnetRequest = parse_body(&body)?;
    let mac = check_mac(&req.mac)?;
    let mut candidates = Vec::with_capacity(req.subnets.len());
    for candidate in &req.subnets {
        let net = Cidr::new(candidate.prefix, candidate.prefix_len)
            .map_err(|e| ApiError::bad_request(format!("prefixLen: {}", e)))?;
        candidates.push((net, candidate));
    }

    let interface = interface_for(&state, &mac).await?;
    let network_id = interface.network_id.ok_or_else(|| ApiError::not_found("Network"))?;
    let network = state
        .store
        .get_network(network_id)
        .await?
        .ok_or_else(|| ApiError::not_found("Network"))?;

    let use_reserved = interface.static_ipv4.is_none() && interface.reserved_ipv4.is_some();
    let expected_pool = match (use_reserved, network.reserved_net.as_deref()) {
        (true, Some(reserved)) => parse_cidr(reserved).map_err(|e| ApiError::internal(e.to_string()))?,
        _ => return Ok(Json(json!({ "subnetId": null }))),
    };
    let network_subnet = parse_cidr(&network.subnet).map_err(|e| ApiError::internal(e.to_string()))?;
    tracing::info!("Expected pool for {}: {}", mac, expected_pool);

    let matched = candidates.into_iter().find(|(net, candidate)| {
        overlaps(net, &network_subnet) && candidate.pools.iter().any(|p| expected_pool.contains_addr(p.first_ip))
    });

    match matched {
        Some((_, candidate)) => {
            tracing::info!("Matched subnet {} for {}", candidate.subnet_id, mac);
            Ok(Json(json!({ "subnetId": candidate.subnet_id })))
        }
        None => Ok(Json(json!({}))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::db::Store;
    use crate::router;
    use axum::body::Body;
    use axum::http::{Method, Request};
    use tower::ServiceExt;

    struct Harness {
        state: Arc<AppState>,
        machine_id: i64,
        network_id: i64,
    }

    async fn harness() -> Harness {
        let store = Store::in_memory().await.unwrap();
        let config = Config {
            tftp_proxy_host: "10.0.0.2".into(),
            default_bootfile: "grubaa64.efi".into(),
            ..Config::default()
        };
        let state = Arc::new(AppState::new(store.clone(), config).unwrap());

        let network = state
            .networks
            .create_network(&NetworkRequest {
                name: "lab".into(),
                subnet: "10.0.0.0/24".into(),
                reserved_net: Some("10.0.0.0/25".into()),
                static_net: Some("10.0.0.128/25".into()),
            })
            .await
            .unwrap();
        let machine = store
            .create_machine(&CreateMachineRequest {
                name: "node-1".into(),
                netboot_enabled: true,
                ..Default::default()
            })
            .await
            .unwrap();

        Harness {
            state,
            machine_id: machine.id,
            network_id: network.id,
        }
    }

    impl Harness {
        async fn interface(&self, mac: &str, static_ipv4: Option<&str>, reserved_ipv4: Option<&str>) {
            self.state
                .networks
                .create_interface(&CreateInterfaceRequest {
                    machine_id: self.machine_id,
                    mac: mac.into(),
                    dhcpv4: true,
                    network_id: Some(self.network_id),
                    static_ipv4: static_ipv4.map(String::from),
                    reserved_ipv4: reserved_ipv4.map(String::from),
                    ..Default::default()
                })
                .await
                .unwrap();
        }

        async fn call(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
            let body = match body {
                Some(v) => Body::from(v.to_string()),
                None => Body::empty(),
            };
            let response = router::build(self.state.clone())
                .oneshot(Request::builder().method(method).uri(uri).body(body).unwrap())
                .await
                .unwrap();
            let status = response.status();
            let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
            let json = if bytes.is_empty() {
                Value::Null
            } else {
                serde_json::from_slice(&bytes).unwrap()
            };
            (status, json)
        }
    }

    #[tokio::test]
    async fn test_health() {
        let h = harness().await;
        let (status, json) = h.call(Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json["service"], "metal-provisioner");
    }

    #[tokio::test]
    async fn test_offer() {
        let h = harness().await;
        h.interface("aa:bb:cc:00:00:01", None, Some("10.0.0.10")).await;
        h.interface("aa:bb:cc:00:00:02", Some("10.0.0.130"), Some("10.0.0.11")).await;

        let (status, json) = h.call(Method::GET, "/ipv4?hwaddr=AA:BB:CC:00:00:01", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            json,
            json!({
                "ipv4": "10.0.0.10",
                "next-server": "10.0.0.2",
                "options": [{"option": 67, "value": "grubaa64.efi"}],
            })
        );

        // static wins, so no address is advertised
        let (_, json) = h.call(Method::GET, "/ipv4?hwaddr=aa:bb:cc:00:00:02", None).await;
        assert!(json.get("ipv4").is_none());

        let (status, _) = h.call(Method::GET, "/ipv4", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, json) = h.call(Method::GET, "/ipv4?hwaddr=aa:bb:cc:00:00:99", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(json["error"], "Interface not found");
        let (status, _) = h.call(Method::GET, "/ipv4?hwaddr=aabbcc000001", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_lease() {
        let h = harness().await;
        let body = json!({"mac": "aa:bb:cc:00:00:05", "ipv4": "10.0.0.50", "duration": 3600});
        let (status, _) = h.call(Method::POST, "/ipv4/lease", Some(body)).await;
        assert_eq!(status, StatusCode::CREATED);

        let body = json!({"mac": "aa:bb:cc:00:00:05", "ipv4": "10.0.0.51", "duration": 60});
        h.call(Method::POST, "/ipv4/lease", Some(body)).await;
        let lease = h.state.networks.get_lease("aa:bb:cc:00:00:05").await.unwrap().unwrap();
        assert_eq!(lease.ipv4, "10.0.0.51");

        for bad in [
            json!({"mac": "aa:bb:cc:00:00:05", "ipv4": "10.0.0.51", "duration": -1}),
            json!({"mac": "aa:bb:cc:00:00", "ipv4": "10.0.0.51", "duration": 1}),
            json!({"mac": "aa:bb:cc:00:00:05", "ipv4": "10.0.0.300", "duration": 1}),
            json!({"mac": "aa:bb:cc:00:00:05", "ipv4": "10.0.0.51"}),
        ] {
            let (status, json) = h.call(Method::POST, "/ipv4/lease", Some(bad)).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert!(json["error"].is_string());
        }
    }

    #[tokio::test]
    async fn test_seen_records_unknown_macs() {
        let h = harness().await;
        h.interface("aa:bb:cc:00:00:01", None, None).await;

        let known = json!({"discover": true, "mac": "aa:bb:cc:00:00:01", "options": []});
        let (status, _) = h.call(Method::POST, "/ipv4/seen", Some(known)).await;
        assert_eq!(status, StatusCode::OK);
        assert!(h.state.store.get_discovered_mac("aa:bb:cc:00:00:01").await.unwrap().is_none());

        let unknown = json!({
            "discover": true,
            "mac": "00:25:90:12:34:56",
            "options": [{"option": 12, "value": "node7"}, {"option": 93, "value": 11}],
        });
        let (status, _) = h.call(Method::POST, "/ipv4/seen", Some(unknown)).await;
        assert_eq!(status, StatusCode::ACCEPTED);

        let seen = h.state.store.get_discovered_mac("00:25:90:12:34:56").await.unwrap().unwrap();
        assert_eq!(seen.info.mac_vendor, "Super Micro Computer");
        assert_eq!(seen.info.hostname, Some(DhcpOptionValue::Text("node7".into())));
        assert_eq!(seen.info.arch_code, Some(DhcpOptionValue::Int(11)));
        assert_eq!(seen.info.arch.as_deref(), Some("ARM 64-bit UEFI"));
    }

    #[test]
    fn test_discovery_info_defaults() {
        let info = discovery_info("de:ad:be:ef:00:01", &[]);
        assert_eq!(info.mac_vendor, "unknown");
        assert!(info.hostname.is_none() && info.arch.is_none());

        let info = discovery_info(
            "de:ad:be:ef:00:01",
            &[SeenOption {
                option: 93,
                value: DhcpOptionValue::Int(999),
            }],
        );
        assert_eq!(info.arch.as_deref(), Some("unknown"));
    }

    #[tokio::test]
    async fn test_subnet_selection() {
        let h = harness().await;
        h.interface("aa:bb:cc:00:00:01", None, Some("10.0.0.10")).await;
        h.interface("aa:bb:cc:00:00:02", Some("10.0.0.130"), None).await;

        let subnets = json!([
            {"subnetId": 1, "prefix": "192.168.0.0", "prefixLen": 24,
             "pools": [{"poolId": 1, "capacity": 10, "firstIP": "192.168.0.10", "lastIP": "192.168.0.20"}]},
            {"subnetId": 2, "prefix": "10.0.0.0", "prefixLen": 24,
             "pools": [{"poolId": 2, "capacity": 10, "firstIP": "10.0.0.200", "lastIP": "10.0.0.210"}]},
            {"subnetId": 3, "prefix": "10.0.0.0", "prefixLen": 24,
             "pools": [{"poolId": 3, "capacity": 10, "firstIP": "10.0.0.20", "lastIP": "10.0.0.30"}]},
        ]);

        let (status, json) = h
            .call(Method::POST, "/ipv4/subnet", Some(json!({"mac": "aa:bb:cc:00:00:01", "subnets": subnets})))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(json, json!({"subnetId": 3}));

        let (_, json) = h
            .call(Method::POST, "/ipv4/subnet", Some(json!({"mac": "aa:bb:cc:00:00:02", "subnets": subnets})))
            .await;
        assert_eq!(json, json!({"subnetId": null}));

        let miss = json!([subnets[0].clone()]);
        let (_, json) = h
            .call(Method::POST, "/ipv4/subnet", Some(json!({"mac": "aa:bb:cc:00:00:01", "subnets": miss})))
            .await;
        assert_eq!(json, json!({}));

        let (status, _) = h
            .call(Method::POST, "/ipv4/subnet", Some(json!({"mac": "aa:bb:cc:00:00:99", "subnets": []})))
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let bad = json!([{"subnetId": 1, "prefix": "10.0.0.0", "prefixLen": 33, "pools": []}]);
        let (status, _) = h
            .call(Method::POST, "/ipv4/subnet", Some(json!({"mac": "aa:bb:cc:00:00:01", "subnets": bad})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
