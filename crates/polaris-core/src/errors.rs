/// Domain errors for the Polaris registry core
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid registration: {0}")]
    Validation(String),

    #[error("no lease for {service}/{instance}")]
    NotFound { service: String, instance: String },

    #[error("internal registry fault: {0}")]
    Internal(String),
}

impl RegistryError {
    pub fn not_found(service: impl Into<String>, instance: impl Into<String>) -> Self {
        RegistryError::NotFound {
            service: service.into(),
            instance: instance.into(),
        }
    }
}
