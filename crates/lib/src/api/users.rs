//! Management backend: users (`/api/v1/users`).

use reqwest::Method;
use serde::{Deserialize, Serialize};

use super::client::{ApiClient, ApiError, Page};

/// Response of `GET /api/v1/users/me`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CurrentUser {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_super_admin: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_system_admin: Option<bool>,
}

/// One row of the user table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub gender: Option<String>,
    #[serde(default)]
    pub department: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub create_time: String,
    #[serde(default)]
    pub update_time: String,
    #[serde(default, rename = "is_system_admin")]
    pub is_system_admin: Option<bool>,
    #[serde(default, rename = "is_super_admin")]
    pub is_super_admin: Option<bool>,
}

/// Body for create and update.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserForm {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gender: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    fn as_str(self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Query for the paginated user list. Pages are 1-based.
#[derive(Debug, Clone)]
pub struct UserQuery {
    pub current_page: u32,
    pub size: u32,
    pub username: Option<String>,
    pub email: Option<String>,
    pub sort_by: String,
    pub sort_order: SortOrder,
}

impl Default for UserQuery {
    fn default() -> Self {
        Self {
            current_page: 1,
            size: 10,
            username: None,
            email: None,
            sort_by: "create_time".to_string(),
            sort_order: SortOrder::Desc,
        }
    }
}

impl UserQuery {
    fn to_query(&self) -> Vec<(&'static str, String)> {
        let mut q = vec![
            ("currentPage", self.current_page.max(1).to_string()),
            ("size", self.size.to_string()),
            ("sort_by", self.sort_by.clone()),
            ("sort_order", self.sort_order.as_str().to_string()),
        ];
        if let Some(u) = self.username.as_deref().filter(|s| !s.is_empty()) {
            q.push(("username", u.to_string()));
        }
        if let Some(e) = self.email.as_deref().filter(|s| !s.is_empty()) {
            q.push(("email", e.to_string()));
        }
        q
    }
}

impl ApiClient {
    pub async fn current_user(&self) -> Result<CurrentUser, ApiError> {
        self.get("api/v1/users/me", &[]).await
    }

    pub async fn list_users(&self, query: &UserQuery) -> Result<Page<User>, ApiError> {
        self.get("api/v1/users", &query.to_query()).await
    }

    pub async fn create_user(&self, form: &UserForm) -> Result<String, ApiError> {
        self.send_unit(self.request(Method::POST, "api/v1/users").json(form))
            .await
    }

    /// The server reads the id from the body, so it is filled in from `user_id`.
    pub async fn update_user(&self, user_id: &str, form: &UserForm) -> Result<String, ApiError> {
        let form = UserForm {
            id: Some(user_id.to_string()),
            ..form.clone()
        };
        self.send_unit(
            self.request(Method::PUT, &format!("api/v1/users/{}", user_id))
                .json(&form),
        )
        .await
    }

    pub async fn delete_user(&self, user_id: &str) -> Result<String, ApiError> {
        self.send_unit(self.request(Method::DELETE, &format!("api/v1/users/{}", user_id)))
            .await
    }
}
