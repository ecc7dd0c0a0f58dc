use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::Result;

use votecache::{CacheError, ChecksumEntry, ChecksumIndex};

static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn unique_root(prefix: &str) -> PathBuf {
    let pid = std::process::id();
    let t = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos();
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("vctest-index-{prefix}-{pid}-{t}-{id}"))
}

fn line(sum: char, block: u64) -> String {
    format!("{}  mainnet-{}.json.zst", sum.to_string().repeat(96), block)
}

#[test]
fn sort_then_upsert_replaces_duplicates() -> Result<()> {
    let mut lines = vec![line('a', 5), line('b', 2), line('c', 9), line('d', 2)];
    ChecksumIndex::sort(&mut lines)?;
    // Стабильная сортировка: 'b' раньше 'd'
    assert_eq!(lines, vec![line('b', 2), line('d', 2), line('a', 5), line('c', 9)]);

    let entry = ChecksumEntry::new("e".repeat(96), "mainnet-2.json.zst")?;
    ChecksumIndex::upsert(&mut lines, &entry);
    assert_eq!(lines, vec![line('e', 2), line('a', 5), line('c', 9)]);
    Ok(())
}

#[test]
fn upsert_appends_new_filename() -> Result<()> {
    let mut lines = vec![line('a', 1)];
    let entry = ChecksumEntry::new("b".repeat(96), "mainnet-10.json.zst")?;
    ChecksumIndex::upsert(&mut lines, &entry);
    assert_eq!(lines, vec![line('a', 1), line('b', 10)]);

    // Суффикс имени не считается совпадением
    let other = ChecksumEntry::new("c".repeat(96), "testmainnet-10.json.zst")?;
    ChecksumIndex::upsert(&mut lines, &other);
    assert_eq!(lines.len(), 3);
    Ok(())
}

#[test]
fn sort_is_all_or_nothing() {
    let mut lines = vec![line('a', 5), "garbage".to_string(), line('b', 1)];
    let before = lines.clone();
    let err = ChecksumIndex::sort(&mut lines).unwrap_err();
    assert!(CacheError::is_index_corruption(&err));
    assert_eq!(lines, before);
}

#[test]
fn parse_entry_rules() -> Result<()> {
    let e = ChecksumIndex::parse_entry(&line('f', 19_000_000))?;
    assert_eq!(e.block_number, 19_000_000);
    assert_eq!(e.filename, "mainnet-19000000.json.zst");

    // CRLF из ручной правки
    let e = ChecksumIndex::parse_entry(&format!("{}\r", line('f', 3)))?;
    assert_eq!(e.filename, "mainnet-3.json.zst");

    for bad in [
        "onlyonefield",
        "abc  def  ghi",
        "abc mainnet-1.json.zst",
        "abc  mainnet-x.json.zst",
        "abc  mainnet-1.json",
        "abc  mainnet-.json.zst",
    ] {
        let err = ChecksumIndex::parse_entry(bad).unwrap_err();
        assert!(CacheError::is_index_corruption(&err), "{bad}: {err:#}");
    }
    Ok(())
}

#[test]
fn parse_and_write_on_disk() -> Result<()> {
    let root = unique_root("disk");
    fs::create_dir_all(&root)?;
    let index = ChecksumIndex::new(root.join("checksums.sha384"));
    assert!(index.parse()?.is_none());

    let lines = vec![line('1', 1), line('2', 2)];
    index.write(&lines)?;
    assert_eq!(index.parse()?, Some(lines.clone()));

    // Пустые строки пропускаются, порядок сохраняется
    fs::write(index.path(), format!("\n{}\n\n{}\n", lines[1], lines[0]))?;
    assert_eq!(index.parse()?, Some(vec![lines[1].clone(), lines[0].clone()]));
    Ok(())
}
