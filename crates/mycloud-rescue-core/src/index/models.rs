/// `mimeType` value the appliance uses to mark folder rows.
pub const DIRECTORY_MIME_TYPE: &str = "application/x.wd.dir";

/// Millisecond timestamps carried by a record, in the order they are
/// trusted when choosing a modification time.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordTimes {
    pub image_date: Option<i64>,
    pub video_date: Option<i64>,
    pub c_time: Option<i64>,
    pub birth_time: Option<i64>,
}

impl RecordTimes {
    /// First present value of imageDate, videoDate, cTime, birthTime.
    pub fn best(&self) -> Option<i64> {
        self.image_date
            .or(self.video_date)
            .or(self.c_time)
            .or(self.birth_time)
    }

    pub fn is_empty(&self) -> bool {
        self.best().is_none()
    }
}

/// One row of the appliance's `Files` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
    pub content_id: Option<String>,
    /// Set when `mimeType` carries the directory marker.
    pub dir_marker: bool,
    /// `None` when the index was loaded in low-memory mode or the row
    /// has no timestamps at all.
    pub times: Option<Box<RecordTimes>>,
}

impl FileRecord {
    pub fn new(id: &str, name: &str, parent_id: Option<&str>, content_id: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            parent_id: parent_id.map(str::to_string),
            content_id: content_id.map(str::to_string),
            dir_marker: false,
            times: None,
        }
    }

    pub fn with_times(mut self, times: RecordTimes) -> Self {
        self.times = if times.is_empty() { None } else { Some(Box::new(times)) };
        self
    }

    /// A record is a transferable file when it has a non-empty content ID and
    /// is not flagged as a directory.
    pub fn is_file(&self) -> bool {
        !self.dir_marker && self.content_id.as_deref().is_some_and(|c| !c.is_empty())
    }

    pub fn best_timestamp(&self) -> Option<i64> {
        self.times.as_ref().and_then(|t| t.best())
    }

    /// Key under which failures for this record are stored in the ledger.
    pub fn failure_key(&self) -> &str {
        match self.content_id.as_deref() {
            Some(cid) if !cid.is_empty() => cid,
            _ => &self.id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_best_timestamp_priority() {
        let times = RecordTimes {
            image_date: None,
            video_date: Some(2_000),
            c_time: Some(3_000),
            birth_time: Some(4_000),
        };
        assert_eq!(times.best(), Some(2_000));

        let times = RecordTimes {
            birth_time: Some(4_000),
            ..Default::default()
        };
        assert_eq!(times.best(), Some(4_000));
        assert_eq!(RecordTimes::default().best(), None);
    }

    #[test]
    fn test_is_file() {
        assert!(FileRecord::new("1", "a.jpg", None, Some("abc")).is_file());
        assert!(!FileRecord::new("1", "dir", None, None).is_file());
        assert!(!FileRecord::new("1", "dir", None, Some("")).is_file());

        let mut marked = FileRecord::new("1", "dir", None, Some("abc"));
        marked.dir_marker = true;
        assert!(!marked.is_file());
    }

    #[test]
    fn test_failure_key_falls_back_to_id() {
        assert_eq!(FileRecord::new("7", "a", None, Some("cid")).failure_key(), "cid");
        assert_eq!(FileRecord::new("7", "a", None, None).failure_key(), "7");
    }

    #[test]
    fn test_with_times_drops_empty() {
        let rec = FileRecord::new("1", "a", None, Some("c")).with_times(RecordTimes::default());
        assert!(rec.times.is_none());
        assert_eq!(rec.best_timestamp(), None);
    }
}
