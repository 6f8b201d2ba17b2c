use crate::model::{PhotoGroup, PhotoItem};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use tracing::debug;

/// Collects photos that Telegram delivers as one media group. Photos of a
/// burst arrive as separate messages sharing a group id; the first one opens
/// an accumulator and schedules a single drain after the collection window.
///
/// The map lock is never held across an await; `take` removes the group and
/// hands it off in one step, so a late photo for the same id starts a fresh
/// group instead of joining a batch that is already processing.
pub struct GroupCollector {
    window: Duration,
    groups: Mutex<HashMap<String, PhotoGroup>>,
}

impl GroupCollector {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            groups: Mutex::new(HashMap::new()),
        }
    }

    /// Append an item to the group, capturing the first non-empty caption.
    /// Returns true when this call created the group; the caller schedules
    /// the drain exactly once for that case.
    pub fn push(&self, group_id: &str, item: PhotoItem, caption: Option<&str>) -> bool {
        let mut groups = self.groups.lock().expect("group map poisoned");
        let opened = !groups.contains_key(group_id);
        let group = groups.entry(group_id.to_string()).or_default();
        if group.caption.is_none() {
            if let Some(caption) = caption.filter(|c| !c.trim().is_empty()) {
                group.caption = Some(caption.to_string());
            }
        }
        group.items.push(item);
        debug!(group_id, items = group.items.len(), "collected photo");
        opened
    }

    /// Remove and return the group, if still present.
    pub fn take(&self, group_id: &str) -> Option<PhotoGroup> {
        self.groups
            .lock()
            .expect("group map poisoned")
            .remove(group_id)
    }

    /// Wait out the collection window, then drain the group.
    pub async fn take_after_window(&self, group_id: &str) -> Option<PhotoGroup> {
        tokio::time::sleep(self.window).await;
        self.take(group_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(file_id: &str) -> PhotoItem {
        PhotoItem {
            file_id: file_id.to_string(),
        }
    }

    #[test]
    fn only_the_first_push_opens_the_group() {
        let collector = GroupCollector::new(Duration::from_millis(10));
        assert!(collector.push("g1", item("a"), None));
        assert!(!collector.push("g1", item("b"), None));
        assert!(collector.push("g2", item("c"), None));
    }

    #[test]
    fn items_keep_arrival_order_and_first_caption_wins() {
        let collector = GroupCollector::new(Duration::from_millis(10));
        collector.push("g1", item("a"), None);
        collector.push("g1", item("b"), Some("libro 5"));
        collector.push("g1", item("c"), Some("libro 9"));

        let group = collector.take("g1").unwrap();
        let order: Vec<&str> = group.items.iter().map(|i| i.file_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c"]);
        assert_eq!(group.caption.as_deref(), Some("libro 5"));
    }

    #[test]
    fn blank_captions_are_ignored() {
        let collector = GroupCollector::new(Duration::from_millis(10));
        collector.push("g1", item("a"), Some("   "));
        collector.push("g1", item("b"), Some("libro 2"));
        let group = collector.take("g1").unwrap();
        assert_eq!(group.caption.as_deref(), Some("libro 2"));
    }

    #[test]
    fn take_empties_the_group_slot() {
        let collector = GroupCollector::new(Duration::from_millis(10));
        collector.push("g1", item("a"), None);
        assert!(collector.take("g1").is_some());
        assert!(collector.take("g1").is_none());
        // A later photo with the same id starts over.
        assert!(collector.push("g1", item("b"), None));
    }

    #[tokio::test]
    async fn drain_waits_for_the_window() {
        let collector = GroupCollector::new(Duration::from_millis(20));
        collector.push("g1", item("a"), Some("libro 1"));
        collector.push("g1", item("b"), None);
        let group = collector.take_after_window("g1").await.unwrap();
        assert_eq!(group.items.len(), 2);
    }
}
