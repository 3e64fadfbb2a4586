//! Port configuration.
//!
//! | Port | Name | Purpose |
//! |------|------|---------|
//! | 8080 | App | Instrumented application traffic |
//! | 9464 | Admin | Health checks and metrics |
//!
//! # Environment Variables
//!
//! - `REQGAUGE_APP_PORT` (default: 8080)
//! - `REQGAUGE_ADMIN_PORT` (default: 9464)

/// Default application port.
pub const DEFAULT_APP_PORT: u16 = 8080;

/// Default admin port, the conventional Prometheus exporter port.
pub const DEFAULT_ADMIN_PORT: u16 = 9464;

pub const APP_PORT_ENV: &str = "REQGAUGE_APP_PORT";
pub const ADMIN_PORT_ENV: &str = "REQGAUGE_ADMIN_PORT";

/// Get the application port from environment or default.
///
/// ```rust
/// use reqgauge_server::ports::app_port;
///
/// let port = app_port();
/// assert!(port > 0);
/// ```
pub fn app_port() -> u16 {
    port_from_env(APP_PORT_ENV, DEFAULT_APP_PORT)
}

/// Get the admin port from environment or default.
pub fn admin_port() -> u16 {
    port_from_env(ADMIN_PORT_ENV, DEFAULT_ADMIN_PORT)
}

fn port_from_env(var: &str, default: u16) -> u16 {
    std::env::var(var)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
