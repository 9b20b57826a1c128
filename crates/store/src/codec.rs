use super::{Error, Result};
use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

/// Decode a gzipped-JSONL object body, one record per non-empty line.
pub async fn read_jsonl<T: serde::de::DeserializeOwned>(body: Bytes) -> Result<Vec<T>> {
    let decoder = async_compression::tokio::bufread::GzipDecoder::new(&body[..]);
    let mut lines = tokio::io::BufReader::new(decoder).lines();

    let mut records = Vec::new();
    let mut line_number = 0;
    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let record = serde_json::from_str(&line).map_err(|err| Error::Decode {
            line: line_number,
            err,
        })?;
        records.push(record);
    }
    Ok(records)
}

/// Encode records as a gzipped-JSONL object body, one record per line.
pub async fn write_jsonl<T: serde::Serialize>(records: &[T]) -> Result<Bytes> {
    let mut encoder = async_compression::tokio::write::GzipEncoder::new(Vec::new());

    for record in records {
        let line = serde_json::to_vec(record).map_err(Error::Encode)?;
        encoder.write_all(&line).await?;
        encoder.write_all(b"\n").await?;
    }
    encoder.shutdown().await?;

    Ok(encoder.into_inner().into())
}

#[cfg(test)]
mod test {
    use super::*;
    use serde_json::{json, Value};

    #[tokio::test]
    async fn test_codec_preserves_records_and_tolerates_blank_lines() {
        let records = vec![
            json!({"message_id": "m1", "reward": 1.5}),
            json!({"message_id": "m2"}),
        ];
        let body = write_jsonl(&records).await.unwrap();

        // Gzip magic bytes.
        assert_eq!(&body[..2], &[0x1f, 0x8b]);

        let read: Vec<Value> = read_jsonl(body).await.unwrap();
        assert_eq!(read, records);

        let empty: Vec<Value> = read_jsonl(write_jsonl::<Value>(&[]).await.unwrap())
            .await
            .unwrap();
        assert!(empty.is_empty());
    }

    #[tokio::test]
    async fn test_decode_error_names_the_line() {
        let body = write_jsonl(&[json!({"ok": true}), json!("not an object")])
            .await
            .unwrap();

        #[derive(Debug, serde::Deserialize)]
        struct Row {
            #[allow(dead_code)]
            ok: bool,
        }
        match read_jsonl::<Row>(body).await {
            Err(Error::Decode { line: 2, .. }) => (),
            other => panic!("unexpected: {other:?}"),
        }
    }
}
