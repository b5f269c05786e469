use anyhow::Result;

/// Address-space ceiling for the queue worker, used as both soft and hard limit.
pub const MEM_LIMIT: u64 = 800_000_000;

/// Soft and hard bounds handed to a [`MemoryLimiter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryLimit {
    pub soft: u64,
    pub hard: u64,
}

impl MemoryLimit {
    /// A limit whose soft and hard bounds are the same number of bytes.
    pub const fn fixed(bytes: u64) -> Self {
        Self { soft: bytes, hard: bytes }
    }
}

/// Installs a process-wide memory ceiling.
pub trait MemoryLimiter {
    fn install(&self, limit: MemoryLimit) -> Result<()>;
}

/// Applies `RLIMIT_AS` to the current process.
#[derive(Debug, Default, Clone, Copy)]
pub struct AddressSpaceLimiter;

#[cfg(unix)]
impl MemoryLimiter for AddressSpaceLimiter {
    fn install(&self, limit: MemoryLimit) -> Result<()> {
        if limit.soft > limit.hard {
            anyhow::bail!(
                "soft address-space limit {} exceeds hard limit {}",
                limit.soft,
                limit.hard
            );
        }

        let rlim = libc::rlimit {
            rlim_cur: limit.soft as libc::rlim_t,
            rlim_max: limit.hard as libc::rlim_t,
        };

        let ret_code = unsafe { libc::setrlimit(libc::RLIMIT_AS, &rlim) };
        if ret_code != 0 {
            let err = std::io::Error::last_os_error();
            return Err(anyhow::Error::new(err).context("setrlimit(RLIMIT_AS) failed"));
        }

        Ok(())
    }
}

#[cfg(not(unix))]
impl MemoryLimiter for AddressSpaceLimiter {
    fn install(&self, _limit: MemoryLimit) -> Result<()> {
        anyhow::bail!("address-space limits are not supported on this platform")
    }
}

/// The current soft `RLIMIT_AS` in bytes, or `None` when unlimited.
#[cfg(unix)]
pub fn current_address_space_limit() -> Result<Option<u64>> {
    let mut out = libc::rlimit {
        rlim_cur: 0,
        rlim_max: 0,
    };
    match unsafe { libc::getrlimit(libc::RLIMIT_AS, &mut out as *mut libc::rlimit) } {
        0 => Ok(()),
        _ => Err(std::io::Error::last_os_error()),
    }?;
    Ok(match out.rlim_cur {
        libc::RLIM_INFINITY => None,
        cur => Some(cur as u64),
    })
}

#[cfg(not(unix))]
pub fn current_address_space_limit() -> Result<Option<u64>> {
    Ok(None)
}
