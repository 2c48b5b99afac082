use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Keyword {
    pub keyword: String,
    pub confidence: f32,
}

#[derive(Serialize, Deserialize, Clone)]
pub struct UploadResponse {
    pub message: String,
    pub filename: String,
    pub keywords: Vec<Keyword>,
}
