pub mod forwarding;
pub mod net_util;
pub mod protocol;
pub mod response;
pub mod server;
pub mod settings;
