//! CMIS 1.1 browser binding backend.
//!
//! Objects are addressed by path below the repository's root folder URL
//! for lookups and by object id for every mutation.

use super::{from_millis, ObjectKind, RemoteObject, VfsBackend};
use crate::error::{Result, SyncError};
use crate::path::{normalize_vfs, vfs_child};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::{Client, RequestBuilder, Response, StatusCode, Url};
use serde_json::Value;
use std::time::Duration;

const PAGE_SIZE: usize = 500;

#[derive(Debug, Clone)]
struct Session {
    repository_id: String,
    root_folder_url: Url,
}

pub struct CmisBackend {
    client: Client,
    url: String,
    username: String,
    password: Option<String>,
    session: Option<Session>,
}

impl CmisBackend {
    pub fn new(
        url: impl Into<String>,
        username: impl Into<String>,
        password: Option<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(format!("cmsync/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: url.into(),
            username: username.into(),
            password,
            session: None,
        })
    }

    fn session(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(SyncError::NotConnected)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.basic_auth(&self.username, self.password.as_deref())
    }

    /// URL of `path` below the root folder
    fn path_url(&self, path: &str) -> Result<Url> {
        let mut url = self.session()?.root_folder_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| SyncError::Config(format!("Invalid root folder URL: {}", self.url)))?;
            segments.pop_if_empty();
            segments.extend(normalize_vfs(path).split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    async fn send(&self, request: RequestBuilder, path: &str) -> Result<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|e| transport_error(&e))?;
        check_status(response, path).await
    }

    async fn json(&self, request: RequestBuilder, path: &str) -> Result<Value> {
        self.send(request, path)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("Invalid response for {}: {}", path, e)))
    }

    async fn object_by_id(&self, id: &str, path: &str) -> Result<RemoteObject> {
        let request = self
            .client
            .get(self.session()?.root_folder_url.clone())
            .query(&[("objectId", id), ("cmisselector", "object"), ("succinct", "true")]);
        let value = self.json(request, path).await?;
        parse_object(&value, path)
    }

    fn action_form(&self, action: &str, object_id: &str) -> Form {
        Form::new()
            .text("cmisaction", action.to_string())
            .text("objectId", object_id.to_string())
            .text("succinct", "true")
    }

    async fn post(&self, form: Form, path: &str) -> Result<Response> {
        let request = self
            .client
            .post(self.session()?.root_folder_url.clone())
            .multipart(form);
        self.send(request, path).await
    }
}

#[async_trait]
impl VfsBackend for CmisBackend {
    async fn connect(&mut self) -> Result<()> {
        let request = self.client.get(&self.url);
        let value = self.json(request, "/").await?;
        let session = parse_repository_info(&value)?;
        tracing::info!(
            "Connected to CMIS repository {} at {}",
            session.repository_id,
            self.url
        );
        self.session = Some(session);
        Ok(())
    }

    async fn object_by_path(&self, path: &str) -> Result<Option<RemoteObject>> {
        let path = normalize_vfs(path);
        let request = self
            .client
            .get(self.path_url(&path)?)
            .query(&[("cmisselector", "object"), ("succinct", "true")]);
        match self.json(request, &path).await {
            Ok(value) => parse_object(&value, &path).map(Some),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn children(&self, folder: &RemoteObject) -> Result<Vec<RemoteObject>> {
        let mut children = Vec::new();
        let mut skip = 0usize;
        let max_items = PAGE_SIZE.to_string();
        loop {
            let skip_count = skip.to_string();
            let request = self
                .client
                .get(self.session()?.root_folder_url.clone())
                .query(&[
                    ("objectId", folder.id.as_str()),
                    ("cmisselector", "children"),
                    ("succinct", "true"),
                    ("maxItems", max_items.as_str()),
                    ("skipCount", skip_count.as_str()),
                ]);
            let value = self.json(request, &folder.path).await?;
            let objects = value
                .get("objects")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();

            for entry in &objects {
                let object = entry.get("object").unwrap_or(entry);
                let name = property(object, "cmis:name")
                    .and_then(Value::as_str)
                    .ok_or_else(|| SyncError::Protocol(format!("Child of {} without name", folder.path)))?;
                children.push(parse_object(object, &vfs_child(&folder.path, name))?);
            }

            skip += objects.len();
            let more = value
                .get("hasMoreItems")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            if !more || objects.is_empty() {
                break;
            }
        }
        children.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(children)
    }

    async fn create_folder(&self, parent: &RemoteObject, name: &str) -> Result<RemoteObject> {
        let path = vfs_child(&parent.path, name);
        let form = self
            .action_form("createFolder", &parent.id)
            .text("propertyId[0]", "cmis:objectTypeId")
            .text("propertyValue[0]", "cmis:folder")
            .text("propertyId[1]", "cmis:name")
            .text("propertyValue[1]", name.to_string());
        let value: Value = self
            .post(form, &path)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("Invalid response for {}: {}", path, e)))?;
        parse_object(&value, &path)
    }

    async fn create_document(
        &self,
        parent: &RemoteObject,
        name: &str,
        content: Vec<u8>,
        mime_type: &str,
    ) -> Result<RemoteObject> {
        let path = vfs_child(&parent.path, name);
        let part = content_part(content, name, mime_type)?;
        let form = self
            .action_form("createDocument", &parent.id)
            .text("propertyId[0]", "cmis:objectTypeId")
            .text("propertyValue[0]", "cmis:document")
            .text("propertyId[1]", "cmis:name")
            .text("propertyValue[1]", name.to_string())
            .part("content", part);
        let value: Value = self
            .post(form, &path)
            .await?
            .json()
            .await
            .map_err(|e| SyncError::Protocol(format!("Invalid response for {}: {}", path, e)))?;
        let created = parse_object(&value, &path)?;
        // Succinct create responses may omit the modification date
        self.object_by_id(&created.id, &path).await
    }

    async fn set_content(
        &self,
        object: &RemoteObject,
        content: Vec<u8>,
        mime_type: &str,
    ) -> Result<RemoteObject> {
        let name = crate::path::vfs_name(&object.path).to_string();
        let part = content_part(content, &name, mime_type)?;
        let form = self
            .action_form("setContent", &object.id)
            .text("overwriteFlag", "true")
            .part("content", part);
        self.post(form, &object.path).await?;
        self.object_by_id(&object.id, &object.path).await
    }

    async fn read_content(&self, object: &RemoteObject) -> Result<Vec<u8>> {
        let request = self
            .client
            .get(self.session()?.root_folder_url.clone())
            .query(&[("objectId", object.id.as_str()), ("cmisselector", "content")]);
        let bytes = self
            .send(request, &object.path)
            .await?
            .bytes()
            .await
            .map_err(|e| transport_error(&e))?;
        Ok(bytes.to_vec())
    }

    async fn delete_tree(&self, folder: &RemoteObject) -> Result<()> {
        let form = self
            .action_form("deleteTree", &folder.id)
            .text("allVersions", "true")
            .text("unfileObjects", "delete")
            .text("continueOnFailure", "true");
        self.post(form, &folder.path).await?;
        Ok(())
    }

    async fn delete_object(&self, object: &RemoteObject) -> Result<()> {
        let form = self
            .action_form("delete", &object.id)
            .text("allVersions", "true");
        self.post(form, &object.path).await?;
        Ok(())
    }
}

fn content_part(content: Vec<u8>, name: &str, mime_type: &str) -> Result<Part> {
    Part::bytes(content)
        .file_name(name.to_string())
        .mime_str(mime_type)
        .map_err(|e| SyncError::Protocol(format!("Invalid MIME type {}: {}", mime_type, e)))
}

fn transport_error(e: &reqwest::Error) -> SyncError {
    if e.is_connect() || e.is_timeout() {
        SyncError::ConnectionFailure {
            message: e.to_string(),
        }
    } else {
        SyncError::Protocol(e.to_string())
    }
}

async fn check_status(response: Response, path: &str) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(map_error(status, &body, path))
}

/// Map an HTTP status and CMIS exception body onto the error taxonomy
fn map_error(status: StatusCode, body: &str, path: &str) -> SyncError {
    let value: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let exception = value.get("exception").and_then(Value::as_str).unwrap_or("");
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or(body)
        .to_string();
    let path = path.to_string();

    match exception {
        "objectNotFound" => return SyncError::NotFound { path },
        "permissionDenied" | "unauthorized" => return SyncError::PermissionDenied { path },
        "contentAlreadyExists" | "nameConstraintViolation" => {
            return SyncError::NameConflict { path }
        }
        _ => {}
    }

    match status {
        StatusCode::NOT_FOUND => SyncError::NotFound { path },
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SyncError::PermissionDenied { path },
        StatusCode::CONFLICT => SyncError::NameConflict { path },
        StatusCode::BAD_GATEWAY | StatusCode::SERVICE_UNAVAILABLE | StatusCode::GATEWAY_TIMEOUT => {
            SyncError::ConnectionFailure {
                message: format!("{}: {}", status, message),
            }
        }
        _ => SyncError::Protocol(format!("{} ({}): {}", path, status, message)),
    }
}

fn parse_repository_info(value: &Value) -> Result<Session> {
    let repo = value
        .as_object()
        .and_then(|repos| repos.values().next())
        .ok_or_else(|| SyncError::Protocol("No repository advertised by the server".to_string()))?;

    let repository_id = repo
        .get("repositoryId")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Protocol("Repository info without repositoryId".to_string()))?
        .to_string();
    let root_folder_url = repo
        .get("rootFolderUrl")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Protocol("Repository info without rootFolderUrl".to_string()))?;
    let root_folder_url = Url::parse(root_folder_url)
        .map_err(|e| SyncError::Protocol(format!("Invalid rootFolderUrl: {}", e)))?;

    Ok(Session {
        repository_id,
        root_folder_url,
    })
}

fn property<'a>(object: &'a Value, name: &str) -> Option<&'a Value> {
    object.get("succinctProperties")?.get(name)
}

fn parse_object(value: &Value, path: &str) -> Result<RemoteObject> {
    let id = property(value, "cmis:objectId")
        .and_then(Value::as_str)
        .ok_or_else(|| SyncError::Protocol(format!("Object {} without cmis:objectId", path)))?
        .to_string();

    let kind = match property(value, "cmis:baseTypeId").and_then(Value::as_str) {
        Some("cmis:folder") => ObjectKind::Folder,
        _ => ObjectKind::Document,
    };

    let last_modified = property(value, "cmis:lastModificationDate")
        .and_then(Value::as_i64)
        .map(from_millis)
        .unwrap_or(std::time::UNIX_EPOCH);

    let size = property(value, "cmis:contentStreamLength")
        .and_then(Value::as_u64)
        .filter(|_| kind == ObjectKind::Document);

    Ok(RemoteObject {
        id,
        path: normalize_vfs(path),
        kind,
        last_modified,
        size,
    })
}
