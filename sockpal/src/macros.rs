macro_rules! syscall {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
      #[allow(unused_unsafe)]
      let res = unsafe { libc::$fn($($arg, )*) };
      if res == -1 {
          Err(std::io::Error::last_os_error())
      } else {
          Ok(res)
      }
  }};
}

/// Like `syscall!`, but restarts the call when a signal interrupts it.
macro_rules! syscall_intr {
  ($fn: ident ( $($arg: expr),* $(,)* ) ) => {{
    loop {
      match syscall!($fn($($arg, )*)) {
        Err(ref err) if err.raw_os_error() == Some(libc::EINTR) => continue,
        other => break other,
      }
    }
  }};
}
