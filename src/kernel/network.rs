//! veth wiring between the host and a child's network namespace.
//!
//! Each operation opens its own rtnetlink connection on a current-thread
//! tokio runtime, so callers stay synchronous and no thread outlives the
//! call. The launcher and the children it clones are single-threaded, and
//! this keeps them that way.

use crate::config::types::{ClonerError, NetworkConfig, Result};
use futures::stream::TryStreamExt;
use log::{debug, info};
use nix::unistd::Pid;
use rtnetlink::{new_connection, Handle};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr};

const LOOPBACK: &str = "lo";

fn run_netlink<T, F, Fut>(op: F) -> Result<T>
where
    F: FnOnce(Handle) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_io()
        .build()
        .map_err(|e| ClonerError::Network(format!("Failed to start netlink runtime: {}", e)))?;

    runtime.block_on(async move {
        let (connection, handle, _) = new_connection().map_err(|e| {
            ClonerError::Network(format!("Failed to create netlink connection: {}", e))
        })?;
        tokio::spawn(connection);
        op(handle).await
    })
}

/// ENODEV: the kernel's answer when a link looked up by name does not exist.
fn is_no_such_device(err: &rtnetlink::Error) -> bool {
    match err {
        rtnetlink::Error::NetlinkError(msg) => msg.code.map(|c| c.get()) == Some(-libc::ENODEV),
        _ => false,
    }
}

async fn link_index(handle: &Handle, name: &str) -> Result<Option<u32>> {
    let mut links = handle.link().get().match_name(name.to_string()).execute();
    match links.try_next().await {
        Ok(Some(link)) => Ok(Some(link.header.index)),
        Ok(None) => Ok(None),
        Err(e) if is_no_such_device(&e) => Ok(None),
        Err(e) => Err(ClonerError::Network(format!(
            "Failed to look up interface {}: {}",
            name, e
        ))),
    }
}

async fn require_link_index(handle: &Handle, name: &str) -> Result<u32> {
    link_index(handle, name)
        .await?
        .ok_or_else(|| ClonerError::Network(format!("Interface {} not found", name)))
}

/// Delete a leftover host-side veth. Missing is the normal case.
async fn delete_stale(handle: &Handle, name: &str) -> Result<()> {
    let Some(index) = link_index(handle, name).await? else {
        return Ok(());
    };

    match handle.link().del(index).execute().await {
        Ok(()) => {
            info!("Deleted stale interface {}", name);
            Ok(())
        }
        Err(e) if is_no_such_device(&e) => Ok(()),
        Err(e) => Err(ClonerError::Network(format!(
            "Failed to delete stale interface {}: {}",
            name, e
        ))),
    }
}

async fn create_pair(handle: &Handle, config: &NetworkConfig) -> Result<()> {
    handle
        .link()
        .add()
        .veth(config.host_veth_name.clone(), config.child_veth_name.clone())
        .execute()
        .await
        .map_err(|e| {
            ClonerError::Network(format!(
                "Failed to create veth pair {}<->{}: {}",
                config.host_veth_name, config.child_veth_name, e
            ))
        })?;
    debug!(
        "Veth pair created: {} <-> {}",
        config.host_veth_name, config.child_veth_name
    );
    Ok(())
}

async fn add_address(handle: &Handle, name: &str, index: u32, addr: Ipv4Addr) -> Result<()> {
    handle
        .address()
        .add(index, IpAddr::V4(addr), NetworkConfig::PREFIX_LEN)
        .execute()
        .await
        .map_err(|e| {
            ClonerError::Network(format!(
                "Failed to set IP {}/{} on {}: {}",
                addr,
                NetworkConfig::PREFIX_LEN,
                name,
                e
            ))
        })
}

async fn set_up(handle: &Handle, name: &str, index: u32) -> Result<()> {
    handle
        .link()
        .set(index)
        .up()
        .execute()
        .await
        .map_err(|e| ClonerError::Network(format!("Failed to bring up {}: {}", name, e)))
}

async fn recreate(handle: &Handle, config: &NetworkConfig) -> Result<()> {
    delete_stale(handle, &config.host_veth_name).await?;
    create_pair(handle, config).await
}

/// Delete any stale host-side veth of the same name and create a fresh pair,
/// both ends in the caller's namespace.
pub fn recreate_veth_pair(config: &NetworkConfig) -> Result<()> {
    run_netlink(|handle| async move { recreate(&handle, config).await })
}

/// Remove the host-side veth (and with it the peer) if present.
pub fn delete_veth_pair(config: &NetworkConfig) -> Result<()> {
    run_netlink(|handle| async move { delete_stale(&handle, &config.host_veth_name).await })
}

/// Privileged side: fresh veth pair, host end addressed and up, child end
/// moved into the network namespace of `child_pid`.
pub fn setup_host_side(config: &NetworkConfig, child_pid: Pid) -> Result<()> {
    run_netlink(|handle| async move {
        recreate(&handle, config).await?;

        let host = require_link_index(&handle, &config.host_veth_name).await?;
        add_address(&handle, &config.host_veth_name, host, config.host_ipv4_address).await?;
        set_up(&handle, &config.host_veth_name, host).await?;

        let child = require_link_index(&handle, &config.child_veth_name).await?;
        handle
            .link()
            .set(child)
            .setns_by_pid(child_pid.as_raw() as u32)
            .execute()
            .await
            .map_err(|e| {
                ClonerError::Network(format!(
                    "Failed to move {} into the namespace of {}: {}",
                    config.child_veth_name, child_pid, e
                ))
            })?;

        info!(
            "Host network ready: {} ({}/{}) <-> {} in pid {}",
            config.host_veth_name,
            config.host_ipv4_address,
            NetworkConfig::PREFIX_LEN,
            config.child_veth_name,
            child_pid
        );
        Ok(())
    })
}

/// Child side, inside the new network namespace: loopback up, child veth
/// addressed and up, default route through the host end.
pub fn configure_child_side(config: &NetworkConfig) -> Result<()> {
    run_netlink(|handle| async move {
        let lo = require_link_index(&handle, LOOPBACK).await?;
        set_up(&handle, LOOPBACK, lo).await?;

        let veth = require_link_index(&handle, &config.child_veth_name).await?;
        add_address(&handle, &config.child_veth_name, veth, config.child_ipv4_address).await?;
        set_up(&handle, &config.child_veth_name, veth).await?;

        handle
            .route()
            .add()
            .v4()
            .gateway(config.host_ipv4_address)
            .execute()
            .await
            .map_err(|e| {
                ClonerError::Network(format!(
                    "Failed to add default route via {}: {}",
                    config.host_ipv4_address, e
                ))
            })
    })
}
