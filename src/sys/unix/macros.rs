/// Helper macro to execute a system call that returns an `io::Result`.
///
/// Mirrors the `syscall!` helper mio's unix selector uses: call the libc
/// function, and turn a `-1` return into `Err(io::Error::last_os_error())`.
macro_rules! syscall {
    ($fn:ident ( $($arg:expr),* $(,)* ) ) => {{
        #[allow(unused_unsafe)]
        let res = unsafe { libc::$fn($($arg, )*) };
        if res == -1 {
            Err(std::io::Error::last_os_error())
        } else {
            Ok(res)
        }
    }};
}
