use std::fs::{File, OpenOptions};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use shared::Keyword;
use tokio::sync::Mutex;

const HEADER: [&str; 4] = ["image_name", "keyword", "confidence", "created_at"];

#[derive(Debug, thiserror::Error)]
pub enum CsvSinkError {
    #[error("CSV file error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV write error: {0}")]
    Write(#[from] csv::Error),
}

#[derive(Debug, Serialize)]
struct CsvRecord<'a> {
    image_name: &'a str,
    keyword: &'a str,
    confidence: f32,
    created_at: &'a str,
}

/// Append-only CSV of detected keywords, shared by all requests. The writer
/// sits behind an async mutex so two requests' rows never merge mid-line.
#[derive(Clone)]
pub struct CsvSink {
    writer: Arc<Mutex<csv::Writer<File>>>,
}

impl CsvSink {
    /// Writes the header only when the file is first created; an existing
    /// file is opened in append mode with its header left untouched.
    pub fn new(path: PathBuf) -> Result<Self, CsvSinkError> {
        let exists = path.exists();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);

        if !exists {
            writer.write_record(HEADER)?;
            writer.flush()?;
        }

        Ok(Self {
            writer: Arc::new(Mutex::new(writer)),
        })
    }

    /// All rows for one request go out as a single locked batch, flushed once.
    pub async fn append(
        &self,
        image_name: &str,
        keywords: &[Keyword],
        created_at: DateTime<Utc>,
    ) -> Result<(), CsvSinkError> {
        let mut writer = self.writer.lock().await;
        let created_at = created_at.to_rfc3339();

        for keyword in keywords {
            writer.serialize(CsvRecord {
                image_name,
                keyword: &keyword.keyword,
                confidence: keyword.confidence,
                created_at: &created_at,
            })?;
        }
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use uuid::Uuid;

    fn temp_csv_path() -> PathBuf {
        std::env::temp_dir().join(format!("image-keywords-{}.csv", Uuid::new_v4()))
    }

    fn sample_keywords() -> Vec<Keyword> {
        vec![
            Keyword {
                keyword: "Cat".to_string(),
                confidence: 0.98,
            },
            Keyword {
                keyword: "Whiskers, long".to_string(),
                confidence: 0.87,
            },
        ]
    }

    fn read_rows(path: &Path) -> Vec<csv::StringRecord> {
        let mut reader = csv::Reader::from_path(path).unwrap();
        reader.records().map(|r| r.unwrap()).collect()
    }

    #[tokio::test]
    async fn appends_one_line_per_keyword() {
        let path = temp_csv_path();
        let sink = CsvSink::new(path.clone()).unwrap();

        sink.append("cat.jpg", &sample_keywords(), Utc::now())
            .await
            .unwrap();

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(&rows[0][0], "cat.jpg");
        assert_eq!(&rows[0][1], "Cat");
        assert_eq!(&rows[0][2], "0.98");
        // Embedded commas survive the round trip quoted.
        assert_eq!(&rows[1][1], "Whiskers, long");

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn header_appears_exactly_once_across_restarts() {
        let path = temp_csv_path();

        {
            let sink = CsvSink::new(path.clone()).unwrap();
            sink.append("cat.jpg", &sample_keywords(), Utc::now())
                .await
                .unwrap();
        }
        {
            let sink = CsvSink::new(path.clone()).unwrap();
            sink.append("dog.jpg", &sample_keywords(), Utc::now())
                .await
                .unwrap();
        }

        let contents = std::fs::read_to_string(&path).unwrap();
        let header_lines = contents
            .lines()
            .filter(|line| *line == "image_name,keyword,confidence,created_at")
            .count();
        assert_eq!(header_lines, 1);
        assert_eq!(contents.lines().count(), 5);

        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_appends_never_interleave_rows() {
        let path = temp_csv_path();
        let sink = CsvSink::new(path.clone()).unwrap();

        let mut handles = Vec::new();
        for batch in 0..4 {
            let sink = sink.clone();
            handles.push(tokio::spawn(async move {
                let image_name = format!("image-{batch}.jpg");
                let keywords: Vec<Keyword> = (0..25)
                    .map(|i| Keyword {
                        keyword: format!("{image_name}-label-{i}"),
                        confidence: 0.5,
                    })
                    .collect();
                sink.append(&image_name, &keywords, Utc::now()).await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let rows = read_rows(&path);
        assert_eq!(rows.len(), 100);
        for row in &rows {
            // Every keyword still belongs to the row's own image.
            assert!(row[1].starts_with(&row[0]));
            let confidence: f32 = row[2].parse().unwrap();
            assert!((0.0..=1.0).contains(&confidence));
        }

        let _ = std::fs::remove_file(&path);
    }
}
