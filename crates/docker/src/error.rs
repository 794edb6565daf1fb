/// Errors raised by a container runtime. None are retried by the caller.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The runtime could not be reached at all.
    #[error("Container runtime unavailable: {0}")]
    Unavailable(String),

    #[error("Unable to pull image {image}: {message}")]
    ImagePull { image: String, message: String },

    #[error("Unable to create container {name}: {message}")]
    Create { name: String, message: String },

    #[error("Unable to attach to container {name}: {message}")]
    Attach { name: String, message: String },

    #[error("Unable to start container {name}: {message}")]
    Start { name: String, message: String },

    #[error("Error waiting for container {name}: {message}")]
    Wait { name: String, message: String },

    #[error("Unable to collect logs of container {name}: {message}")]
    Logs { name: String, message: String },

    #[error("Unable to stop or remove container {name}: {message}")]
    Cleanup { name: String, message: String },
}

impl RuntimeError {
    /// Short step name, used in log fields.
    pub fn step(&self) -> &'static str {
        match self {
            Self::Unavailable(_) => "connect",
            Self::ImagePull { .. } => "pull",
            Self::Create { .. } => "create",
            Self::Attach { .. } => "attach",
            Self::Start { .. } => "start",
            Self::Wait { .. } => "wait",
            Self::Logs { .. } => "logs",
            Self::Cleanup { .. } => "cleanup",
        }
    }
}
