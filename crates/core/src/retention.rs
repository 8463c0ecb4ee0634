//! Image retention policy.
//!
//! Pure evaluation over a listing of the output directory. The agent owns
//! the filesystem side (listing and deleting); this module only decides
//! which entries go.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use validator::Validate;

use crate::types::Timestamp;

/// Caps applied to the output directory. Either, both or neither may be
/// set; an empty policy keeps everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Validate, Serialize)]
pub struct RetentionPolicy {
    /// Keep at most this many images (newest first).
    #[validate(range(min = 1))]
    pub max_images: Option<usize>,
    /// Delete images older than this.
    pub max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn is_unbounded(&self) -> bool {
        self.max_images.is_none() && self.max_age.is_none()
    }
}

/// One image found in the output directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredImage {
    pub path: PathBuf,
    pub modified: Timestamp,
    pub size_bytes: u64,
}

/// Choose which images to delete, oldest first.
///
/// Images modified at or after `protect_from` (the start of a capture
/// still in flight) are never selected, since they may be partially
/// written. They still count towards `max_images`.
pub fn select_evictions(
    images: &[StoredImage],
    policy: &RetentionPolicy,
    now: Timestamp,
    protect_from: Option<Timestamp>,
) -> Vec<StoredImage> {
    if policy.is_unbounded() {
        return Vec::new();
    }

    let mut sorted: Vec<&StoredImage> = images.iter().collect();
    // Oldest first; ties broken by path so sequence numbers order them.
    sorted.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.path.cmp(&b.path)));

    let over_count = policy
        .max_images
        .map(|max| sorted.len().saturating_sub(max))
        .unwrap_or(0);

    let age_cutoff = policy
        .max_age
        .and_then(|age| chrono::Duration::from_std(age).ok())
        .map(|age| now - age);

    sorted
        .into_iter()
        .enumerate()
        .filter(|(idx, image)| {
            let too_many = *idx < over_count;
            let too_old = age_cutoff.is_some_and(|cutoff| image.modified < cutoff);
            too_many || too_old
        })
        .map(|(_, image)| image)
        .filter(|image| protect_from.map_or(true, |from| image.modified < from))
        .cloned()
        .collect()
}

/// Report returned after a retention pass completes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetentionReport {
    pub files_scanned: usize,
    pub files_deleted: usize,
    pub bytes_reclaimed: u64,
    pub errors: Vec<String>,
}

/// Human-readable byte formatting.
pub fn format_bytes(bytes: u64) -> String {
    const KB: f64 = 1024.0;
    const MB: f64 = KB * 1024.0;
    const GB: f64 = MB * 1024.0;
    const TB: f64 = GB * 1024.0;

    let b = bytes as f64;
    if b >= TB {
        format!("{:.2} TB", b / TB)
    } else if b >= GB {
        format!("{:.2} GB", b / GB)
    } else if b >= MB {
        format!("{:.2} MB", b / MB)
    } else if b >= KB {
        format!("{:.2} KB", b / KB)
    } else {
        format!("{bytes} B")
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn images(count: usize, now: Timestamp) -> Vec<StoredImage> {
        // Image i is (count - i) minutes old, so higher i is newer.
        (0..count)
            .map(|i| StoredImage {
                path: PathBuf::from(format!("img_{i:03}.jpg")),
                modified: now - chrono::Duration::minutes((count - i) as i64),
                size_bytes: 1000,
            })
            .collect()
    }

    fn names(selected: &[StoredImage]) -> Vec<String> {
        selected
            .iter()
            .map(|i| i.path.display().to_string())
            .collect()
    }

    #[test]
    fn unbounded_policy_evicts_nothing() {
        let now = Utc::now();
        assert!(select_evictions(&images(10, now), &RetentionPolicy::default(), now, None).is_empty());
    }

    #[test]
    fn count_cap_keeps_newest() {
        let now = Utc::now();
        let policy = RetentionPolicy {
            max_images: Some(3),
            max_age: None,
        };
        let evicted = select_evictions(&images(5, now), &policy, now, None);
        assert_eq!(names(&evicted), vec!["img_000.jpg", "img_001.jpg"]);
    }

    #[test]
    fn under_cap_evicts_nothing() {
        let now = Utc::now();
        let policy = RetentionPolicy {
            max_images: Some(10),
            max_age: None,
        };
        assert!(select_evictions(&images(5, now), &policy, now, None).is_empty());
    }

    #[test]
    fn age_cap_removes_old_images() {
        let now = Utc::now();
        let policy = RetentionPolicy {
            max_images: None,
            max_age: Some(Duration::from_secs(150)),
        };
        // Ages: 5, 4, 3, 2, 1 minutes.
        let evicted = select_evictions(&images(5, now), &policy, now, None);
        assert_eq!(names(&evicted), vec!["img_000.jpg", "img_001.jpg", "img_002.jpg"]);
    }

    #[test]
    fn caps_combine() {
        let now = Utc::now();
        let policy = RetentionPolicy {
            max_images: Some(4),
            max_age: Some(Duration::from_secs(210)),
        };
        let evicted = select_evictions(&images(5, now), &policy, now, None);
        assert_eq!(names(&evicted), vec!["img_000.jpg", "img_001.jpg"]);
    }

    #[test]
    fn in_flight_capture_is_never_selected() {
        let now = Utc::now();
        let mut listing = images(3, now);
        listing.push(StoredImage {
            path: PathBuf::from("partial.jpg"),
            modified: now - chrono::Duration::milliseconds(500),
            size_bytes: 10,
        });
        // Everything is past the age cap, including the file being written.
        let policy = RetentionPolicy {
            max_images: None,
            max_age: Some(Duration::ZERO),
        };

        let evicted = select_evictions(&listing, &policy, now, Some(now - chrono::Duration::seconds(1)));
        assert_eq!(
            names(&evicted),
            vec!["img_000.jpg", "img_001.jpg", "img_002.jpg"]
        );
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(100 * 1024 * 1024), "100.00 MB");
    }
}
