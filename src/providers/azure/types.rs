use serde::Deserialize;

/// Envelope every Azure DevOps list endpoint returns.
#[derive(Debug, Deserialize)]
pub struct ListResponse<T> {
    #[serde(default)]
    pub count: usize,
    pub value: Vec<T>,
}

/// A build as returned by `_apis/build/builds`. Every field is optional so a
/// single odd record can be rejected on its own.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildDto {
    pub id: Option<u64>,
    pub status: Option<String>,
    pub result: Option<String>,
    pub queue_time: Option<String>,
    pub start_time: Option<String>,
    pub finish_time: Option<String>,
    pub source_branch: Option<String>,
    pub definition: Option<NamedRefDto>,
    pub repository: Option<NamedRefDto>,
}

#[derive(Debug, Default, Deserialize)]
pub struct NamedRefDto {
    pub name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionDto {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path: String,
    pub queue_status: Option<String>,
}
