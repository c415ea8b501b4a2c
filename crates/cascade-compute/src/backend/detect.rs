//! Which devices this build can create, and which one `auto` picks.
//!
//! The CPU device is always present. The wgpu device is compiled in with
//! the `wgpu` feature and only counts when an adapter answers. Setting
//! `CASCADE_BACKEND` pins the choice, provided the named device exists.

use super::Backend;

/// Environment variable forcing a backend (`cpu`, `wgpu`, `auto`).
pub const BACKEND_ENV: &str = "CASCADE_BACKEND";

/// One device this build knows how to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    pub backend: Backend,
    /// The device can be created on this machine.
    pub available: bool,
    /// `auto` takes the available entry with the highest rank.
    pub rank: u8,
    /// What the device runs node programs on.
    pub note: &'static str,
}

/// Every compiled-in device, best rank first.
pub fn detect_backends() -> Vec<BackendInfo> {
    let mut found = vec![BackendInfo {
        backend: Backend::Cpu,
        available: true,
        rank: 1,
        note: "reference kernels on the rayon thread pool",
    }];

    #[cfg(feature = "wgpu")]
    found.push(BackendInfo {
        backend: Backend::Wgpu,
        available: super::WgpuDevice::is_available(),
        rank: 2,
        note: "WGSL compute shaders on a wgpu adapter",
    });

    found.sort_by_key(|info| std::cmp::Reverse(info.rank));
    found
}

/// Device `auto` resolves to, honoring `CASCADE_BACKEND`.
pub fn select_best_backend() -> Backend {
    pick(&detect_backends(), std::env::var(BACKEND_ENV).ok().as_deref())
}

fn pick(found: &[BackendInfo], forced: Option<&str>) -> Backend {
    let usable = |backend: Backend| found.iter().any(|info| info.backend == backend && info.available);
    if let Some(backend) = forced.and_then(|name| name.parse::<Backend>().ok()) {
        if backend != Backend::Auto && usable(backend) {
            return backend;
        }
    }
    found
        .iter()
        .filter(|info| info.available)
        .max_by_key(|info| info.rank)
        .map_or(Backend::Cpu, |info| info.backend)
}

/// One line per compiled-in device, `*` marking the usable ones.
pub fn describe_backends() -> String {
    detect_backends()
        .iter()
        .map(|info| {
            let mark = if info.available { '*' } else { ' ' };
            format!("{mark} {:<5} {}\n", info.backend.name(), info.note)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn found(gpu: bool) -> Vec<BackendInfo> {
        vec![
            BackendInfo { backend: Backend::Wgpu, available: gpu, rank: 2, note: "" },
            BackendInfo { backend: Backend::Cpu, available: true, rank: 1, note: "" },
        ]
    }

    #[test]
    fn test_pick_prefers_highest_available_rank() {
        assert_eq!(pick(&found(true), None), Backend::Wgpu);
        assert_eq!(pick(&found(false), None), Backend::Cpu);
    }

    #[test]
    fn test_pick_honors_forced_backend() {
        assert_eq!(pick(&found(true), Some("cpu")), Backend::Cpu);
        // A forced device that is missing falls back to the ranking.
        assert_eq!(pick(&found(false), Some("wgpu")), Backend::Cpu);
        assert_eq!(pick(&found(true), Some("auto")), Backend::Wgpu);
        assert_eq!(pick(&found(true), Some("nonsense")), Backend::Wgpu);
    }

    #[test]
    fn test_cpu_always_listed() {
        let found = detect_backends();
        assert!(found.iter().any(|info| info.backend == Backend::Cpu && info.available));
        assert!(describe_backends().contains("cpu"));
    }
}
