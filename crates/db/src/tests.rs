use crate::error::{DbError, DbResult};
use crate::{Database, def_table};

def_table! {
    /// Test table
    test_kv: u64 => String
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn write_then_read() -> DbResult<()> {
    let db = Database::new_in_memory().await?;
    assert!(db.is_ephemeral());

    db.write_with(|tx| {
        let mut tbl = tx.open_table(&test_kv::TABLE)?;
        tbl.insert(&1, &"one".to_string())?;
        tbl.insert(&2, &"two".to_string())?;
        Ok(())
    })
    .await?;

    let (one, missing) = db
        .read_with(|tx| {
            let tbl = tx.open_table(&test_kv::TABLE)?;
            Ok((
                tbl.get(&1)?.map(|g| g.value()),
                tbl.get(&3)?.map(|g| g.value()),
            ))
        })
        .await?;

    assert_eq!(one.as_deref(), Some("one"));
    assert_eq!(missing, None);
    Ok(())
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn open_needs_a_file_path() {
    assert!(matches!(
        Database::open("").await,
        Err(DbError::InvalidPath { .. })
    ));
}
