// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Desired state read from a YAML file on every fetch, so edits to the file are
//! picked up on the next refresh without a restart.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::domain::node_repository::{DesiredState, NodeRepository, NodeRepositoryError};

pub struct FileNodeRepository {
    path: PathBuf,
}

impl FileNodeRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl NodeRepository for FileNodeRepository {
    async fn desired_state(&self) -> Result<DesiredState, NodeRepositoryError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            NodeRepositoryError::Unavailable(format!("{}: {}", self.path.display(), e))
        })?;
        DesiredState::from_yaml_str(&content)
    }
}
