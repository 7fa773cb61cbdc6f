#![warn(missing_docs)]
#![warn(clippy::missing_docs_in_private_items)]

use std::path::PathBuf;

use hf_hub::{
    Repo, RepoType,
    api::sync::{ApiBuilder, ApiError},
};

use crate::{config::ModelSource, error::LoadFailure};

/// Resolves `file` from `source`, downloading it into the hub cache if needed.
///
/// With an offline directory configured the file must already exist at
/// `<local_dir>/<model_id>/<file>`.
pub fn fetch(source: &ModelSource, file: &str) -> Result<PathBuf, LoadFailure> {
    if let Some(dir) = source.local_dir() {
        let path = dir.join(source.model_id()).join(file);
        return if path.is_file() {
            Ok(path)
        } else {
            Err(LoadFailure::Other(format!("{} does not exist", path.display())))
        };
    }

    let api = ApiBuilder::new()
        .with_progress(false)
        .with_token(source.token().map(str::to_owned))
        .build()
        .map_err(classify)?;
    let repo = api.repo(Repo::with_revision(
        source.model_id().to_string(),
        RepoType::Model,
        source.revision().to_string(),
    ));

    tracing::debug!(model = source.model_id(), file, "resolving model file");
    repo.get(file).map_err(classify)
}

/// Maps hub errors onto load failures, separating transport problems from the
/// rest.
fn classify(err: ApiError) -> LoadFailure {
    match err {
        ApiError::RequestError(inner) => LoadFailure::Connectivity(inner.to_string()),
        other => LoadFailure::Other(other.to_string()),
    }
}
