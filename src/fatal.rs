//! Fatal-programmer-error reporting: a second `EventLoop` on one thread,
//! descriptor-creation failure at startup, or an `epoll_ctl` ADD/MOD
//! failure are all unrecoverable. Log then abort; there is no defined
//! recovery.

pub(crate) fn fatal(context: &str, err: std::io::Error) -> ! {
    #[cfg(feature = "log")]
    log::error!("{context}: {err}");
    #[cfg(not(feature = "log"))]
    let _ = &err;
    panic!("{context}: {err}");
}

pub(crate) fn fatal_msg(context: &str) -> ! {
    #[cfg(feature = "log")]
    log::error!("{context}");
    panic!("{context}");
}
