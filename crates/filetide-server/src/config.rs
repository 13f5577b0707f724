use std::net::SocketAddr;

use clap::Parser;

use filetide_core::Limits;

#[derive(Debug, Parser, Clone)]
#[command(name = "filetide-server")]
#[command(about = "Streaming file-pipeline server")]
pub struct Cli {
    /// Address to listen on.
    #[arg(long, default_value = "0.0.0.0:8000")]
    pub listen: SocketAddr,

    /// Cap in bytes for buffering a non-seekable input into memory.
    #[arg(long, default_value_t = 100 * 1024 * 1024)]
    pub max_buffer_bytes: u64,
}

impl Cli {
    pub fn limits(&self) -> Limits {
        Limits {
            max_buffer_bytes: self.max_buffer_bytes,
        }
    }
}
