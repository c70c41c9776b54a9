//! veth management against the real kernel. Needs CAP_NET_ADMIN.

mod common;

use common::{has_net_admin, is_root};
use rustbox_cloner::kernel::network::{delete_veth_pair, recreate_veth_pair};
use rustbox_cloner::NetworkConfig;
use std::path::Path;

fn test_config() -> NetworkConfig {
    NetworkConfig {
        host_veth_name: "rbxt-host".to_string(),
        child_veth_name: "rbxt-child".to_string(),
        ..NetworkConfig::default()
    }
}

fn link_exists(name: &str) -> bool {
    Path::new("/sys/class/net").join(name).exists()
}

#[test]
fn stale_pair_is_replaced_and_removed() {
    if !is_root() || !has_net_admin() {
        eprintln!("skipping: needs CAP_NET_ADMIN");
        return;
    }
    let config = test_config();

    recreate_veth_pair(&config).unwrap();
    assert!(link_exists(&config.host_veth_name));
    assert!(link_exists(&config.child_veth_name));

    // A leftover pair from an earlier spawn is not an error.
    recreate_veth_pair(&config).unwrap();
    assert!(link_exists(&config.host_veth_name));

    delete_veth_pair(&config).unwrap();
    assert!(!link_exists(&config.host_veth_name));
    assert!(!link_exists(&config.child_veth_name));

    // Nothing left to delete.
    delete_veth_pair(&config).unwrap();
}
