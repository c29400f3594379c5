use crate::config::PathCase;
use crate::database::models::VideoRecord;
use crate::media::scanner::ScanEvent;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Consumer-side view of the library, built from scan events.
///
/// Records are keyed by path under the configured case policy. A record for
/// a path already present replaces the old one in place, so a refresh never
/// produces duplicates.
#[derive(Debug, Default)]
pub struct VideoLibrary {
    path_case: PathCase,
    videos: Vec<VideoRecord>,
    index: HashMap<String, usize>,
    completed: HashMap<String, (PathBuf, usize)>,
}

impl VideoLibrary {
    pub fn new(path_case: PathCase) -> Self {
        Self {
            path_case,
            ..Default::default()
        }
    }

    /// Seed from a cached snapshot before the first scan finishes.
    pub fn with_snapshot(path_case: PathCase, records: Vec<VideoRecord>) -> Self {
        let mut library = Self::new(path_case);
        for record in records {
            library.upsert(record);
        }
        library
    }

    pub fn apply(&mut self, event: ScanEvent) {
        match event {
            ScanEvent::VideoReady { video } => {
                self.upsert(video);
            }
            ScanEvent::ScanComplete { folder, total } => {
                self.completed
                    .insert(self.path_case.key(&folder), (folder, total));
            }
        }
    }

    /// Insert or replace by path. Returns true when an existing record was replaced.
    pub fn upsert(&mut self, record: VideoRecord) -> bool {
        let key = self.path_case.key(&record.path);
        match self.index.get(&key) {
            Some(&position) => {
                self.videos[position] = record;
                true
            }
            None => {
                self.index.insert(key, self.videos.len());
                self.videos.push(record);
                false
            }
        }
    }

    pub fn remove(&mut self, path: &Path) -> Option<VideoRecord> {
        let position = self.index.remove(&self.path_case.key(path))?;
        let removed = self.videos.remove(position);
        self.reindex();
        Some(removed)
    }

    /// Drop every record that lives directly in `folder`.
    pub fn remove_folder(&mut self, folder: &Path) -> usize {
        let before = self.videos.len();
        let path_case = self.path_case;
        self.videos.retain(|video| {
            video
                .folder()
                .map_or(true, |parent| !path_case.same(parent, folder))
        });
        self.completed.remove(&path_case.key(folder));
        self.reindex();
        before - self.videos.len()
    }

    fn reindex(&mut self) {
        self.index = self
            .videos
            .iter()
            .enumerate()
            .map(|(position, video)| (self.path_case.key(&video.path), position))
            .collect();
    }

    pub fn get(&self, path: &Path) -> Option<&VideoRecord> {
        self.index
            .get(&self.path_case.key(path))
            .map(|&position| &self.videos[position])
    }

    pub fn get_mut(&mut self, path: &Path) -> Option<&mut VideoRecord> {
        let position = *self.index.get(&self.path_case.key(path))?;
        self.videos.get_mut(position)
    }

    pub fn videos(&self) -> &[VideoRecord] {
        &self.videos
    }

    pub fn len(&self) -> usize {
        self.videos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.videos.is_empty()
    }

    /// Candidate count reported by the last completed scan of `folder`.
    pub fn scanned_total(&self, folder: &Path) -> Option<usize> {
        self.completed
            .get(&self.path_case.key(folder))
            .map(|(_, total)| *total)
    }

    pub fn completed_folders(&self) -> impl Iterator<Item = &Path> {
        self.completed.values().map(|(folder, _)| folder.as_path())
    }
}
