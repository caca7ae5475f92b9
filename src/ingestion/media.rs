//! Local media storage.
//!
//! Files live under `<uploads>/<tenant>/` and are referenced as
//! `/uploads/<tenant>/<file>`, never by the network's expiring CDN URL.

use std::path::{Component, Path, PathBuf};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::session::MediaKind;

pub const URL_PREFIX: &str = "/uploads/";

#[derive(Debug, Clone)]
pub struct MediaStore {
    root: PathBuf,
}

impl MediaStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Save bytes downloaded for an inbound message and return the local URL.
    ///
    /// The network message id is part of the file name, so two attachments
    /// arriving in the same second never share a file.
    pub async fn store_received(
        &self,
        tenant_id: Uuid,
        message_id: &str,
        kind: MediaKind,
        file_name: Option<&str>,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> std::io::Result<String> {
        let name = received_file_name(kind, message_id, file_name, now);
        self.write(tenant_id, &name, bytes).await
    }

    /// Save bytes of an outbound attachment before it is sent.
    pub async fn store_outbound(
        &self,
        tenant_id: Uuid,
        kind: MediaKind,
        file_name: &str,
        bytes: &[u8],
        now: DateTime<Utc>,
    ) -> std::io::Result<String> {
        let unique = Uuid::new_v4().simple().to_string();
        let name = outbound_file_name(kind, &unique, file_name, now);
        self.write(tenant_id, &name, bytes).await
    }

    /// Map a `/uploads/...` URL back to a file under the root.
    ///
    /// Returns `None` for other URLs and for paths escaping the root.
    pub fn resolve_local(&self, url: &str) -> Option<PathBuf> {
        let relative = Path::new(url.strip_prefix(URL_PREFIX)?);
        let safe = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_)));
        safe.then(|| self.root.join(relative))
    }

    async fn write(&self, tenant_id: Uuid, name: &str, bytes: &[u8]) -> std::io::Result<String> {
        let tenant_dir = self.root.join(tenant_id.to_string());
        tokio::fs::create_dir_all(&tenant_dir).await?;
        tokio::fs::write(tenant_dir.join(name), bytes).await?;
        Ok(format!("{}{}/{}", URL_PREFIX, tenant_id, name))
    }
}

fn stamp(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

fn sanitize(file_name: &str) -> String {
    file_name
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '/' | '\\' => '_',
            other => other,
        })
        .collect::<String>()
        .trim_start_matches(['.', '_'])
        .to_string()
}

/// `<stamp>_<unique>_`, keeping only path-safe characters of `unique`.
fn prefix(now: DateTime<Utc>, unique: &str) -> String {
    let unique: String = unique
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'))
        .collect();
    if unique.is_empty() {
        format!("{}_", stamp(now))
    } else {
        format!("{}_{}_", stamp(now), unique)
    }
}

fn received_file_name(
    kind: MediaKind,
    message_id: &str,
    file_name: Option<&str>,
    now: DateTime<Utc>,
) -> String {
    let prefix = prefix(now, message_id);
    match kind {
        MediaKind::Image => format!("{}received.jpg", prefix),
        MediaKind::Document => match file_name.map(sanitize).filter(|n| !n.is_empty()) {
            Some(name) => format!("{}{}", prefix, name),
            None => format!("{}received.pdf", prefix),
        },
    }
}

fn outbound_file_name(
    kind: MediaKind,
    unique: &str,
    file_name: &str,
    now: DateTime<Utc>,
) -> String {
    let default_ext = match kind {
        MediaKind::Image => "jpg",
        MediaKind::Document => "pdf",
    };
    let mut name = sanitize(file_name);
    if name.is_empty() {
        name = "attachment".to_string();
    }
    if Path::new(&name).extension().is_none() {
        name = format!("{}.{}", name, default_ext);
    }
    format!("{}{}", prefix(now, unique), name)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-10T09:05:07Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn received_names_follow_kind() {
        assert_eq!(
            received_file_name(MediaKind::Image, "3EB0A1", None, now()),
            "20250310_090507_3EB0A1_received.jpg"
        );
        assert_eq!(
            received_file_name(MediaKind::Document, "3EB0A1", Some("price list.pdf"), now()),
            "20250310_090507_3EB0A1_price_list.pdf"
        );
        assert_eq!(
            received_file_name(MediaKind::Document, "3EB0A1", Some("  "), now()),
            "20250310_090507_3EB0A1_received.pdf"
        );
    }

    #[test]
    fn same_second_attachments_get_distinct_names() {
        let first = received_file_name(MediaKind::Image, "IMG_A", None, now());
        let second = received_file_name(MediaKind::Image, "IMG_B", None, now());
        assert_ne!(first, second);
        assert_eq!(
            received_file_name(MediaKind::Image, "../x/y", None, now()),
            "20250310_090507_xy_received.jpg"
        );
    }

    #[test]
    fn outbound_names_get_default_extension() {
        assert_eq!(
            outbound_file_name(MediaKind::Image, "ab12", "promo", now()),
            "20250310_090507_ab12_promo.jpg"
        );
        assert_eq!(
            outbound_file_name(MediaKind::Document, "ab12", "../menu.docx", now()),
            "20250310_090507_ab12_menu.docx"
        );
    }

    #[tokio::test]
    async fn outbound_attachments_never_overwrite_each_other() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path());
        let tenant = Uuid::new_v4();
        let first = store
            .store_outbound(tenant, MediaKind::Image, "promo.jpg", b"one", now())
            .await
            .unwrap();
        let second = store
            .store_outbound(tenant, MediaKind::Image, "promo.jpg", b"two", now())
            .await
            .unwrap();
        assert_ne!(first, second);
        let first = store.resolve_local(&first).unwrap();
        assert_eq!(tokio::fs::read(first).await.unwrap(), b"one");
    }

    #[test]
    fn resolve_local_rejects_escapes() {
        let store = MediaStore::new("/data/uploads");
        assert_eq!(
            store.resolve_local("/uploads/t1/a.jpg"),
            Some(PathBuf::from("/data/uploads/t1/a.jpg"))
        );
        assert_eq!(store.resolve_local("/uploads/../etc/passwd"), None);
        assert_eq!(store.resolve_local("https://cdn.example/a.jpg"), None);
    }

    #[tokio::test]
    async fn writes_under_tenant_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = MediaStore::new(dir.path());
        let tenant = Uuid::new_v4();
        let url = store
            .store_received(tenant, "3EB0A1", MediaKind::Image, None, b"jpeg-bytes", now())
            .await
            .unwrap();
        assert_eq!(
            url,
            format!("/uploads/{}/20250310_090507_3EB0A1_received.jpg", tenant)
        );
        let path = store.resolve_local(&url).unwrap();
        assert_eq!(tokio::fs::read(path).await.unwrap(), b"jpeg-bytes");
    }
}
