//! Grounded on `proxy-server::main`'s `RLIMIT_NOFILE` bump: the wrapper
//! and the tracker each hold one file descriptor per concurrent
//! connection (spec §5), so both raise their soft limit to the hard
//! limit at startup rather than risk `EMFILE` under a burst.

#[cfg(unix)]
pub fn raise_nofile_limit() -> anyhow::Result<()> {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};
    let (_soft, hard) = getrlimit(Resource::RLIMIT_NOFILE)?;
    setrlimit(Resource::RLIMIT_NOFILE, hard, hard)?;
    Ok(())
}

#[cfg(not(unix))]
pub fn raise_nofile_limit() -> anyhow::Result<()> {
    Ok(())
}
