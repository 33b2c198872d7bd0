//! NUMA placement helpers (Linux)
//!
//! - allowed memory nodes of this process (`Mems_allowed_list`)
//! - preferred-node allocation policy for the calling thread (`set_mempolicy`)
//! - page residency queries (`move_pages` with a null node list)
//! - CPU affinity to the cores of a node (`sched_setaffinity`)
//!
//! Policy and page queries are best effort: kernels without NUMA support and
//! sandboxes that deny the syscalls report them as unavailable.

use crate::error::{BenchError, BenchResult};
use std::sync::atomic::{AtomicBool, Ordering};

/// Highest node id representable in a policy mask
const MAX_NODES: usize = 1024;

const MPOL_DEFAULT: libc::c_int = 0;
const MPOL_PREFERRED: libc::c_int = 1;

static PAGE_QUERY_WARNED: AtomicBool = AtomicBool::new(false);

/// Parse a kernel list format such as `"0-3,8,10-11"`.
pub fn parse_list(s: &str) -> Vec<usize> {
    let mut out = Vec::new();
    for part in s.trim().split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((lo, hi)) => {
                if let (Ok(lo), Ok(hi)) = (lo.trim().parse::<usize>(), hi.trim().parse::<usize>()) {
                    out.extend(lo..=hi);
                }
            }
            None => {
                if let Ok(v) = part.parse::<usize>() {
                    out.push(v);
                }
            }
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

/// NUMA nodes this process may allocate memory on, ascending.
///
/// Falls back to the online node list and finally to node 0.
pub fn allowed_nodes() -> Vec<usize> {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            if let Some(list) = status
                .lines()
                .find_map(|l| l.strip_prefix("Mems_allowed_list:"))
            {
                let nodes = parse_list(list);
                if !nodes.is_empty() {
                    return nodes;
                }
            }
        }
        if let Ok(online) = std::fs::read_to_string("/sys/devices/system/node/online") {
            let nodes = parse_list(&online);
            if !nodes.is_empty() {
                return nodes;
            }
        }
    }
    vec![0]
}

/// System page size in bytes
pub fn page_size() -> usize {
    #[cfg(unix)]
    {
        // SAFETY: sysconf has no memory-safety preconditions
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size > 0 {
            return size as usize;
        }
    }
    4096
}

/// Restores the default allocation policy of the calling thread on drop
#[derive(Debug)]
pub struct PreferredNodeGuard {
    applied: bool,
}

impl PreferredNodeGuard {
    /// Whether the kernel accepted the policy
    pub fn applied(&self) -> bool {
        self.applied
    }
}

impl Drop for PreferredNodeGuard {
    fn drop(&mut self) {
        if self.applied {
            set_mempolicy(MPOL_DEFAULT, None);
        }
    }
}

/// Prefer `node` for allocations made by the calling thread.
pub fn prefer_node(node: usize) -> PreferredNodeGuard {
    if node >= MAX_NODES {
        return PreferredNodeGuard { applied: false };
    }
    let applied = set_mempolicy(MPOL_PREFERRED, Some(node));
    if !applied {
        tracing::debug!("prefer_node: set_mempolicy unavailable, relying on first touch");
    }
    PreferredNodeGuard { applied }
}

#[cfg(target_os = "linux")]
fn set_mempolicy(mode: libc::c_int, node: Option<usize>) -> bool {
    let bits = 8 * std::mem::size_of::<libc::c_ulong>();
    let mut mask = vec![0 as libc::c_ulong; MAX_NODES / bits];
    let (mask_ptr, maxnode) = match node {
        Some(n) => {
            mask[n / bits] |= 1 << (n % bits);
            (mask.as_ptr(), (MAX_NODES + 1) as libc::c_ulong)
        }
        None => (std::ptr::null(), 0),
    };
    // SAFETY: mask outlives the call and holds MAX_NODES bits
    let rc = unsafe { libc::syscall(libc::SYS_set_mempolicy, mode, mask_ptr, maxnode) };
    rc == 0
}

#[cfg(not(target_os = "linux"))]
fn set_mempolicy(_mode: libc::c_int, _node: Option<usize>) -> bool {
    false
}

/// NUMA node of every page of `[ptr, ptr + bytes)`.
///
/// `Ok(None)` when the kernel cannot answer (no NUMA support or syscall
/// denied). Negative entries are per-page errors reported by the kernel.
pub fn page_nodes(ptr: *const u8, bytes: usize) -> BenchResult<Option<Vec<i32>>> {
    #[cfg(target_os = "linux")]
    {
        let page = page_size();
        let base = (ptr as usize) & !(page - 1);
        let end = ptr as usize + bytes;
        let pages: Vec<*mut libc::c_void> = (base..end)
            .step_by(page)
            .map(|addr| addr as *mut libc::c_void)
            .collect();
        let mut status = vec![0 as libc::c_int; pages.len()];

        // SAFETY: `pages` and `status` have equal length; a null node list only queries
        let rc = unsafe {
            libc::syscall(
                libc::SYS_move_pages,
                0 as libc::c_int,
                pages.len() as libc::c_ulong,
                pages.as_ptr(),
                std::ptr::null::<libc::c_int>(),
                status.as_mut_ptr(),
                0 as libc::c_int,
            )
        };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            return match err.raw_os_error() {
                Some(libc::ENOSYS) | Some(libc::EPERM) | Some(libc::EACCES) => {
                    if !PAGE_QUERY_WARNED.swap(true, Ordering::Relaxed) {
                        tracing::warn!("Page placement query unavailable ({}), skipping NUMA verification", err);
                    }
                    Ok(None)
                }
                _ => Err(BenchError::NumaError(format!("move_pages failed: {}", err))),
            };
        }
        Ok(Some(status))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let _ = (ptr, bytes);
        if !PAGE_QUERY_WARNED.swap(true, Ordering::Relaxed) {
            tracing::warn!("Page placement query unavailable on this OS, skipping NUMA verification");
        }
        Ok(None)
    }
}

/// Verify every page of an allocation lives on `node`.
///
/// Skipped with a warning only when the page query itself is unavailable.
pub fn check_pages(ptr: *const u8, bytes: usize, node: usize) -> BenchResult<()> {
    let Some(status) = page_nodes(ptr, bytes)? else {
        return Ok(());
    };
    verify_page_status(&status, node)?;
    tracing::trace!("check_pages: {} pages resident on node {}", status.len(), node);
    Ok(())
}

/// Check a `move_pages` status array: every entry must name `node`.
pub fn verify_page_status(status: &[i32], node: usize) -> BenchResult<()> {
    for (page, &actual) in status.iter().enumerate() {
        if actual < 0 {
            return Err(BenchError::AllocationFailed(format!(
                "page {} of allocation has invalid status {}",
                page, actual
            )));
        }
        if actual as usize != node {
            return Err(BenchError::PagePlacement {
                page,
                expected: node,
                actual,
            });
        }
    }
    Ok(())
}

/// CPUs belonging to `node`, or `None` when the system exposes no node topology.
pub fn node_cpus(node: usize) -> BenchResult<Option<Vec<usize>>> {
    let path = format!("/sys/devices/system/node/node{}/cpulist", node);
    match std::fs::read_to_string(&path) {
        Ok(list) => Ok(Some(parse_list(&list))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(crate::error::io_context(e, &path)),
    }
}

/// Restrict the calling thread to the CPUs of `node`.
///
/// CPUs outside the current affinity mask (e.g. a container cpuset) are
/// ignored. Systems without node topology accept node 0 only.
pub fn run_on_node(node: usize) -> BenchResult<()> {
    let cpus = match node_cpus(node)? {
        Some(cpus) => cpus,
        None if node == 0 => return Ok(()),
        None => {
            return Err(BenchError::NumaError(format!(
                "Unable to set CPU to NUMA node {}: node not present",
                node
            )))
        }
    };
    set_affinity(node, &cpus)
}

#[cfg(target_os = "linux")]
fn set_affinity(node: usize, cpus: &[usize]) -> BenchResult<()> {
    let set_size = std::mem::size_of::<libc::cpu_set_t>();
    // SAFETY: cpu_set_t is plain data; every call receives its exact size
    unsafe {
        let mut current: libc::cpu_set_t = std::mem::zeroed();
        if libc::sched_getaffinity(0, set_size, &mut current) != 0 {
            return Err(BenchError::NumaError(format!(
                "sched_getaffinity failed: {}",
                std::io::Error::last_os_error()
            )));
        }

        let mut set: libc::cpu_set_t = std::mem::zeroed();
        let mut count = 0;
        for &cpu in cpus.iter().filter(|&&c| c < libc::CPU_SETSIZE as usize) {
            if libc::CPU_ISSET(cpu, &current) {
                libc::CPU_SET(cpu, &mut set);
                count += 1;
            }
        }
        if count == 0 {
            return Err(BenchError::NumaError(format!(
                "Unable to set CPU to NUMA node {}: no permitted CPUs",
                node
            )));
        }
        if libc::sched_setaffinity(0, set_size, &set) != 0 {
            return Err(BenchError::NumaError(format!(
                "Unable to set CPU to NUMA node {}: {}",
                node,
                std::io::Error::last_os_error()
            )));
        }
        tracing::trace!("run_on_node: thread bound to {} CPUs of node {}", count, node);
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn set_affinity(_node: usize, _cpus: &[usize]) -> BenchResult<()> {
    Ok(())
}

/// Lock pages in RAM; returns false when the limit or platform refuses.
pub fn lock_pages(ptr: *const u8, bytes: usize) -> bool {
    #[cfg(unix)]
    {
        // SAFETY: the range belongs to a live allocation of `bytes` bytes
        unsafe { libc::mlock(ptr.cast::<libc::c_void>(), bytes) == 0 }
    }
    #[cfg(not(unix))]
    {
        let _ = (ptr, bytes);
        false
    }
}

pub fn unlock_pages(ptr: *const u8, bytes: usize) {
    #[cfg(unix)]
    {
        // SAFETY: munlock on an unlocked range is a no-op
        unsafe {
            libc::munlock(ptr.cast::<libc::c_void>(), bytes);
        }
    }
    #[cfg(not(unix))]
    {
        let _ = (ptr, bytes);
    }
}
