use serde::Serialize;

// The request body is read as raw JSON in the handler: the attribute
// overrides are validated against the scaler's feature list at runtime, not
// by serde.

#[derive(Debug, Serialize)]
pub struct GenerateResponse {
    /// The original free-text message, echoed back.
    pub message: String,
    /// The generated reply.
    pub response: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}
