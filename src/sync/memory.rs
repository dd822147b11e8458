use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};

use super::remote::{RemoteError, RemoteMetadata, RemoteStore};

/// An in-process [`RemoteStore`], for exercising sync without a network.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<String, (Vec<u8>, DateTime<Utc>)>,
    failure: Option<RemoteError>,
    puts: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Place an object as if someone else had uploaded it at `last_modified`.
    pub fn seed(&self, path: &str, bytes: Vec<u8>, last_modified: DateTime<Utc>) {
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(path.to_string(), (bytes, last_modified));
    }

    pub fn object(&self, path: &str) -> Option<Vec<u8>> {
        let inner = self.inner.lock().unwrap();
        inner.objects.get(path).map(|(bytes, _)| bytes.clone())
    }

    pub fn last_modified(&self, path: &str) -> Option<DateTime<Utc>> {
        let inner = self.inner.lock().unwrap();
        inner.objects.get(path).map(|(_, at)| *at)
    }

    /// Make every call fail with `failure` until cleared with `None`.
    pub fn fail_with(&self, failure: Option<RemoteError>) {
        self.inner.lock().unwrap().failure = failure;
    }

    /// Number of successful uploads so far.
    pub fn puts(&self) -> usize {
        self.inner.lock().unwrap().puts
    }

    fn check(&self) -> Result<(), RemoteError> {
        match &self.inner.lock().unwrap().failure {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

#[rocket::async_trait]
impl RemoteStore for MemoryStore {
    fn describe(&self, path: &str) -> String {
        format!("memory://{path}")
    }

    async fn put(&self, path: &str, bytes: Vec<u8>) -> Result<(), RemoteError> {
        self.check()?;
        let mut inner = self.inner.lock().unwrap();
        inner.objects.insert(path.to_string(), (bytes, Utc::now()));
        inner.puts += 1;
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        self.check()?;
        self.object(path).ok_or(RemoteError::NotFound)
    }

    async fn metadata(&self, path: &str) -> Result<RemoteMetadata, RemoteError> {
        self.check()?;
        self.last_modified(path)
            .map(|last_modified| RemoteMetadata { last_modified })
            .ok_or(RemoteError::NotFound)
    }
}
