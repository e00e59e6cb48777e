//! Logging macros that capture the call site

/// Log with no server context: `log_perror!(level, status, "fmt", args..)`
#[macro_export]
macro_rules! log_perror {
    ($level:expr, $status:expr, $($arg:tt)+) => {
        $crate::entry::log_perror(
            Some($crate::Location::new(file!(), line!())),
            $crate::Level::from($level),
            $status,
            format_args!($($arg)+),
        )
    };
}

/// Log to a server: `log_error!(Some(&server), level, status, "fmt", args..)`
#[macro_export]
macro_rules! log_error {
    ($server:expr, $level:expr, $status:expr, $($arg:tt)+) => {
        $crate::entry::log_error(
            $server,
            Some($crate::Location::new(file!(), line!())),
            $crate::Level::from($level),
            $status,
            format_args!($($arg)+),
        )
    };
}

/// Log for a connection: `log_cerror!(&conn, level, status, "fmt", args..)`
#[macro_export]
macro_rules! log_cerror {
    ($conn:expr, $level:expr, $status:expr, $($arg:tt)+) => {
        $crate::entry::log_cerror(
            $conn,
            Some($crate::Location::new(file!(), line!())),
            $crate::Level::from($level),
            $status,
            format_args!($($arg)+),
        )
    };
}

/// Log for a request: `log_rerror!(&mut req, level, status, "fmt", args..)`
#[macro_export]
macro_rules! log_rerror {
    ($req:expr, $level:expr, $status:expr, $($arg:tt)+) => {
        $crate::entry::log_rerror(
            $req,
            Some($crate::Location::new(file!(), line!())),
            $crate::Level::from($level),
            $status,
            format_args!($($arg)+),
        )
    };
}

/// Abort with a logged message when `cond` is false
#[macro_export]
macro_rules! log_assert {
    ($cond:expr) => {
        if !$cond {
            $crate::entry::log_assert(stringify!($cond), file!(), line!());
        }
    };
}
