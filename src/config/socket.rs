//! Listener socket configuration
//!
//! Optional OS-level tuning applied to the listening socket before bind.

use serde::{Deserialize, Serialize};

/// Socket options for the listening socket
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct SocketConfig {
    /// SO_RCVBUF in bytes (OS default when unset)
    #[serde(default)]
    pub recv_buffer_size: Option<usize>,

    /// SO_SNDBUF in bytes (OS default when unset)
    #[serde(default)]
    pub send_buffer_size: Option<usize>,

    /// Set SO_REUSEADDR before binding
    #[serde(default)]
    pub reuse_address: bool,
}
