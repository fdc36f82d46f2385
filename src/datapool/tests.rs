use std::io::Write;
use std::sync::Arc;

use crate::error::AppResult;

use super::*;

fn rows(items: &[&str]) -> Vec<Row> {
    items.iter().map(|item| (*item).to_owned()).collect()
}

#[tokio::test]
async fn in_memory_once_exhausts() -> AppResult<()> {
    let descriptor = DatapoolDescriptor::InMemoryOnce {
        rows: rows(&["a", "b"]),
    };
    let pool = Datapool::build(&descriptor, 16).await?;
    assert_eq!(pool.next_row().await, RowFetch::Row("a".to_owned()));
    assert_eq!(pool.next_row().await, RowFetch::Row("b".to_owned()));
    assert_eq!(pool.next_row().await, RowFetch::Exhausted);
    assert_eq!(pool.next_row().await, RowFetch::Exhausted);
    Ok(())
}

#[tokio::test]
async fn in_memory_recycle_wraps_in_fifo_order() -> AppResult<()> {
    let descriptor = DatapoolDescriptor::InMemoryRecycle {
        rows: rows(&["a", "b"]),
    };
    let pool = Datapool::build(&descriptor, 16).await?;
    let mut fetched = Vec::new();
    for _ in 0..5 {
        match pool.next_row().await {
            RowFetch::Row(row) => fetched.push(row),
            RowFetch::Exhausted => panic!("Recycling pool must not exhaust"),
        }
    }
    assert_eq!(fetched, rows(&["a", "b", "a", "b", "a"]));
    Ok(())
}

#[tokio::test]
async fn each_row_goes_to_exactly_one_consumer() -> AppResult<()> {
    let row_count = 200;
    let descriptor = DatapoolDescriptor::InMemoryOnce {
        rows: (0..row_count).map(|idx| idx.to_string()).collect(),
    };
    let pool = Datapool::build(&descriptor, 16).await?;

    let mut workers = Vec::new();
    for _ in 0..4 {
        let pool = pool.clone();
        workers.push(tokio::spawn(async move {
            let mut mine = Vec::new();
            loop {
                match pool.next_row().await {
                    RowFetch::Row(row) => mine.push(row),
                    RowFetch::Exhausted => return mine,
                }
            }
        }));
    }

    let mut all = Vec::new();
    for worker in workers {
        all.extend(worker.await?);
    }
    all.sort_by_key(|row| row.parse::<u32>().unwrap_or(u32::MAX));
    let expected: Vec<String> = (0..row_count).map(|idx| idx.to_string()).collect();
    assert_eq!(all, expected);
    Ok(())
}

#[tokio::test]
async fn file_once_streams_lines_then_exhausts() -> AppResult<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "alpha\nbeta\ngamma")?;
    let descriptor = DatapoolDescriptor::FileOnce {
        path: file.path().display().to_string(),
    };
    let pool = Datapool::build(&descriptor, 4).await?;
    assert_eq!(pool.next_row().await, RowFetch::Row("alpha".to_owned()));
    assert_eq!(pool.next_row().await, RowFetch::Row("beta".to_owned()));
    assert_eq!(pool.next_row().await, RowFetch::Row("gamma".to_owned()));
    assert_eq!(pool.next_row().await, RowFetch::Exhausted);
    Ok(())
}

#[tokio::test]
async fn file_recycle_rewinds_at_eof() -> AppResult<()> {
    let mut file = tempfile::NamedTempFile::new()?;
    writeln!(file, "one\ntwo")?;
    let descriptor = DatapoolDescriptor::FileRecycle {
        path: file.path().display().to_string(),
    };
    let pool = Datapool::build(&descriptor, 2).await?;
    let mut fetched = Vec::new();
    for _ in 0..5 {
        match pool.next_row().await {
            RowFetch::Row(row) => fetched.push(row),
            RowFetch::Exhausted => panic!("Recycling file pool must not exhaust"),
        }
    }
    assert_eq!(fetched, rows(&["one", "two", "one", "two", "one"]));
    pool.close();
    Ok(())
}

#[tokio::test]
async fn missing_file_fails_at_build_time() {
    let descriptor = DatapoolDescriptor::FileOnce {
        path: "/definitely/not/here.rows".to_owned(),
    };
    assert!(Datapool::build(&descriptor, 4).await.is_err());
}

#[tokio::test]
async fn close_stops_handouts() -> AppResult<()> {
    let descriptor = DatapoolDescriptor::InMemoryRecycle {
        rows: rows(&["a"]),
    };
    let pool = Datapool::build(&descriptor, 4).await?;
    assert_eq!(pool.next_row().await, RowFetch::Row("a".to_owned()));
    pool.close();
    assert_eq!(pool.next_row().await, RowFetch::Exhausted);

    // Clones observe the close too.
    let clone = Arc::new(pool.clone());
    assert_eq!(clone.next_row().await, RowFetch::Exhausted);
    Ok(())
}
