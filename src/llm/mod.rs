pub mod activation;
pub mod attention;
pub mod decoder;
pub mod embedding;
pub mod encoder;
pub mod inference;
pub mod layer;
pub mod linear;
pub mod lm_head;
pub mod mlp;
pub mod models;
pub mod rms_norm;
