//! Persisted chat → Twitter credentials mapping.
//!
//! File format: a JSON object keyed by the chat id as a string,
//! `{"123": {"id": 123, "oauth_token": {...}}}`. The whole file is rewritten on
//! every change.

use std::{
    collections::BTreeMap,
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    domain::ChatId,
    twitter::{AccessCredentials, RequestToken},
    Result,
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OAuthToken {
    Authorized(AccessCredentials),
    Pending(RequestToken),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chat {
    pub id: i64,
    pub oauth_token: OAuthToken,
}

impl Chat {
    pub fn chat_id(&self) -> ChatId {
        ChatId(self.id)
    }

    pub fn credentials(&self) -> Option<&AccessCredentials> {
        match &self.oauth_token {
            OAuthToken::Authorized(c) => Some(c),
            OAuthToken::Pending(_) => None,
        }
    }

    pub fn request_token(&self) -> Option<&RequestToken> {
        match &self.oauth_token {
            OAuthToken::Pending(t) => Some(t),
            OAuthToken::Authorized(_) => None,
        }
    }
}

#[derive(Debug)]
pub struct ChatStore {
    path: PathBuf,
    chats: BTreeMap<i64, Chat>,
}

impl ChatStore {
    /// Load the store from `path`. A missing or empty file yields an empty store.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let chats = load_chats_file(&path)?;
        Ok(Self { path, chats })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.chats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chats.is_empty()
    }

    pub fn get(&self, chat_id: ChatId) -> Option<&Chat> {
        self.chats.get(&chat_id.0)
    }

    /// Chats that completed the PIN flow.
    pub fn authorized(&self) -> Vec<(ChatId, AccessCredentials)> {
        self.chats
            .values()
            .filter_map(|c| c.credentials().map(|cr| (c.chat_id(), cr.clone())))
            .collect()
    }

    pub fn upsert(&mut self, chat: Chat) -> Result<()> {
        self.chats.insert(chat.id, chat);
        self.save()
    }

    /// Remove a chat. Returns the removed entry; the file is only rewritten if
    /// something changed.
    pub fn remove(&mut self, chat_id: ChatId) -> Result<Option<Chat>> {
        let removed = self.chats.remove(&chat_id.0);
        if removed.is_some() {
            self.save()?;
        }
        Ok(removed)
    }

    fn save(&self) -> Result<()> {
        save_chats_file(&self.path, &self.chats)
    }
}

fn load_chats_file(path: &Path) -> Result<BTreeMap<i64, Chat>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let txt = fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    Ok(serde_json::from_str(&txt)?)
}

/// Write via a sibling temp file + rename so a crash never leaves a torn file.
fn save_chats_file(path: &Path, chats: &BTreeMap<i64, Chat>) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir)?;

    let file_name = path
        .file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "chats.json".to_string());
    let tmp = dir.join(format!(".{file_name}.tmp"));

    let txt = serde_json::to_string(chats)?;
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(txt.as_bytes())?;
        f.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
