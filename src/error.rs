use thiserror::Error;

#[derive(Error, Debug)]
pub enum CubeError {
    /// A scan or query references a dimension, cuboid, measure or function
    /// that the model does not define.
    #[error("Malformed model: {0}")]
    MalformedModel(String),

    /// COMPLEMENT on a non-invertible function, or a merge spanning two cuboids.
    #[error("Operation not supported: {0}")]
    UnsupportedOperation(String),

    #[error("Store IO error: {0}")]
    StoreIo(String),

    #[error("Iterator protocol violation: {0}")]
    IteratorProtocol(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Codec error: {0}")]
    Codec(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{} scanner(s) failed to open: {}", .0.len(), join_errors(.0))]
    ScanFanOut(Vec<CubeError>),
}

pub type CubeResult<T> = Result<T, CubeError>;

fn join_errors(errors: &[CubeError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl CubeError {
    /// Shorthand for the "call out of sequence" family of errors
    pub fn protocol(msg: impl Into<String>) -> Self {
        CubeError::IteratorProtocol(msg.into())
    }

    pub fn malformed(msg: impl Into<String>) -> Self {
        CubeError::MalformedModel(msg.into())
    }
}

impl serde::Serialize for CubeError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.collect_str(self)
    }
}

impl From<rocksdb::Error> for CubeError {
    fn from(err: rocksdb::Error) -> Self {
        CubeError::StoreIo(err.to_string())
    }
}

impl From<std::io::Error> for CubeError {
    fn from(err: std::io::Error) -> Self {
        CubeError::Codec(err.to_string())
    }
}

impl From<bincode::Error> for CubeError {
    fn from(err: bincode::Error) -> Self {
        CubeError::Codec(format!("Aggregation state: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = CubeError::MalformedModel("unknown cuboid 'sales'".to_string());
        assert_eq!(err.to_string(), "Malformed model: unknown cuboid 'sales'");

        let err = CubeError::UnsupportedOperation("COMPLEMENT on MIN".to_string());
        assert_eq!(err.to_string(), "Operation not supported: COMPLEMENT on MIN");

        let err = CubeError::protocol("current() before next()");
        assert_eq!(
            err.to_string(),
            "Iterator protocol violation: current() before next()"
        );

        let err = CubeError::Encoding("value too wide".to_string());
        assert_eq!(err.to_string(), "Encoding error: value too wide");
    }

    #[test]
    fn test_fan_out_lists_every_failure() {
        let err = CubeError::ScanFanOut(vec![
            CubeError::StoreIo("a".to_string()),
            CubeError::malformed("b"),
        ]);
        assert_eq!(
            err.to_string(),
            "2 scanner(s) failed to open: Store IO error: a; Malformed model: b"
        );
    }

    #[test]
    fn test_error_serializes_as_string() {
        let err = CubeError::Config("scan_batch_size must be > 0".to_string());
        let json = serde_json::to_string(&err).unwrap();
        assert_eq!(json, "\"Configuration error: scan_batch_size must be > 0\"");
    }

    #[test]
    fn test_cube_result_type() {
        let ok_result: CubeResult<i32> = Ok(42);
        assert_eq!(ok_result.unwrap(), 42);
    }
}
