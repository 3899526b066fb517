//! Organisation and user lookup consumed by the dispatcher.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{RegistryError, Result};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: String,
    pub name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub username: String,
    pub organization: String,
}

/// Identity a dispatch or probe call is made on behalf of. Passed explicitly
/// down every call that reaches a worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DispatchContext {
    pub organization: String,
    pub user: String,
}

impl DispatchContext {
    pub fn new(organization: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            organization: organization.into(),
            user: user.into(),
        }
    }
}

#[async_trait]
pub trait IdentityDirectory: Send + Sync {
    /// `RegistryError::NotFound` when the organisation is unknown.
    async fn resolve_organization(&self, id: &str) -> Result<Organization>;

    async fn resolve_user(&self, organization: &Organization, username: &str) -> Result<Option<User>>;

    /// Resolves both halves of a job's identity.
    async fn context_for(&self, organization: &str, username: &str) -> Result<Option<DispatchContext>> {
        let org = match self.resolve_organization(organization).await {
            Ok(org) => org,
            Err(err) if err.is_not_found() => return Ok(None),
            Err(err) => return Err(err),
        };
        Ok(self
            .resolve_user(&org, username)
            .await?
            .map(|user| DispatchContext::new(org.id, user.username)))
    }
}

/// Fixed directory built from configuration.
#[derive(Clone, Debug, Default)]
pub struct StaticDirectory {
    organizations: HashMap<String, Organization>,
    users: HashMap<(String, String), User>,
    accept_any_user: bool,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Known organisations; every user name is accepted.
    pub fn permissive<I, S>(organizations: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut directory = Self {
            accept_any_user: true,
            ..Self::default()
        };
        for org in organizations {
            directory = directory.with_organization(org);
        }
        directory
    }

    pub fn with_organization(mut self, id: impl Into<String>) -> Self {
        let id = id.into();
        self.organizations.insert(
            id.clone(),
            Organization {
                name: id.clone(),
                id,
            },
        );
        self
    }

    pub fn with_user(mut self, organization: impl Into<String>, username: impl Into<String>) -> Self {
        let organization = organization.into();
        let username = username.into();
        self.users.insert(
            (organization.clone(), username.clone()),
            User {
                username,
                organization,
            },
        );
        self
    }
}

#[async_trait]
impl IdentityDirectory for StaticDirectory {
    async fn resolve_organization(&self, id: &str) -> Result<Organization> {
        self.organizations
            .get(id)
            .cloned()
            .ok_or_else(|| RegistryError::not_found(format!("organization {id}")))
    }

    async fn resolve_user(&self, organization: &Organization, username: &str) -> Result<Option<User>> {
        if let Some(user) = self
            .users
            .get(&(organization.id.clone(), username.to_string()))
        {
            return Ok(Some(user.clone()));
        }
        Ok(self.accept_any_user.then(|| User {
            username: username.to_string(),
            organization: organization.id.clone(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_organization_yields_no_context() {
        let directory = StaticDirectory::new()
            .with_organization("default")
            .with_user("default", "admin");

        assert_eq!(
            directory.context_for("default", "admin").await.unwrap(),
            Some(DispatchContext::new("default", "admin"))
        );
        assert_eq!(directory.context_for("default", "ghost").await.unwrap(), None);
        assert_eq!(directory.context_for("other", "admin").await.unwrap(), None);
    }

    #[tokio::test]
    async fn permissive_directory_accepts_any_user() {
        let directory = StaticDirectory::permissive(["default"]);
        assert!(directory.context_for("default", "anyone").await.unwrap().is_some());
        assert!(directory.context_for("other", "anyone").await.unwrap().is_none());
    }
}
