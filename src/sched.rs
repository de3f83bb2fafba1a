// Scoped real-time scheduling for the scan thread

/// Holds SCHED_RR for the calling thread and restores the previous policy
/// when dropped, including on early-abort paths.
///
/// Acquisition is best effort: without the privilege the scan simply runs
/// at normal priority.
pub struct RealtimeGuard {
    #[cfg(target_os = "linux")]
    previous: Option<(libc::c_int, libc::sched_param)>,
}

impl RealtimeGuard {
    #[cfg(target_os = "linux")]
    pub fn acquire() -> Self {
        // Safety: pid 0 addresses the calling thread; sched_param is plain data
        unsafe {
            let policy = libc::sched_getscheduler(0);
            let mut old_param: libc::sched_param = std::mem::zeroed();
            if policy < 0 || libc::sched_getparam(0, &mut old_param) != 0 {
                tracing::warn!(
                    error = %std::io::Error::last_os_error(),
                    "Cannot read the current scheduling policy"
                );
                return Self { previous: None };
            }

            let mut param: libc::sched_param = std::mem::zeroed();
            param.sched_priority = libc::sched_get_priority_min(libc::SCHED_RR);
            if libc::sched_setscheduler(0, libc::SCHED_RR, &param) != 0 {
                tracing::warn!(
                    error = %std::io::Error::last_os_error(),
                    "Real-time scheduling unavailable, scanning at normal priority"
                );
                return Self { previous: None };
            }

            tracing::debug!(priority = param.sched_priority, "Switched to SCHED_RR");
            Self {
                previous: Some((policy, old_param)),
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    pub fn acquire() -> Self {
        tracing::warn!("Real-time scheduling is only supported on Linux");
        Self {}
    }

    /// Whether the elevated policy is in effect.
    pub fn is_active(&self) -> bool {
        #[cfg(target_os = "linux")]
        {
            self.previous.is_some()
        }
        #[cfg(not(target_os = "linux"))]
        {
            false
        }
    }
}

impl Drop for RealtimeGuard {
    fn drop(&mut self) {
        #[cfg(target_os = "linux")]
        if let Some((policy, param)) = self.previous.take() {
            // Safety: restores the values read in acquire
            let rc = unsafe { libc::sched_setscheduler(0, policy, &param) };
            if rc != 0 {
                tracing::warn!(
                    error = %std::io::Error::last_os_error(),
                    "Failed to restore the scheduling policy"
                );
            } else {
                tracing::debug!("Restored the previous scheduling policy");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    #[cfg(target_os = "linux")]
    fn test_guard_restores_policy() {
        let before = unsafe { libc::sched_getscheduler(0) };
        {
            let _guard = RealtimeGuard::acquire();
        }
        let after = unsafe { libc::sched_getscheduler(0) };
        assert_eq!(before, after, "policy restored whether or not SCHED_RR was granted");
    }
}
