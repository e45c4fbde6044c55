use std::thread;

use tracing::warn;

#[derive(Debug, Clone)]
pub struct SystemProfile {
    pub logical_cores: usize,
    pub worker_threads: usize,
    pub strict_durability: bool, // true = fsync every append, false = OS buffer (faster)
}

impl SystemProfile {
    pub fn detect() -> Self {
        let cores = thread::available_parallelism().map(|n| n.get()).unwrap_or(1);
        Self::for_cores(cores)
    }

    pub fn for_cores(cores: usize) -> Self {
        // CASE 1: Potato Mode (Single Core)
        if cores <= 1 {
            warn!("CPU constraint detected (cores: {}), appends will not fsync", cores);

            Self {
                logical_cores: cores,
                worker_threads: 2, // 1 Compute + 1 I/O
                strict_durability: false,
            }
        }
        // CASE 2: Standard / Server Mode
        else {
            Self {
                logical_cores: cores,
                worker_threads: cores,
                strict_durability: true,
            }
        }
    }
}
