use std::fs;
use std::io::Cursor;
use std::path::Path;

use shelflist_common::CancelFlag;
use shelflist_index::zipnum::{write_zipnum, ZipNumParams};
use shelflist_search::{
    filters::finish_results, search_file, search_flat_file, search_zipnum_index, LineFilter,
    MatchType, SearchKey,
};

const FIXTURE: &str = concat!(
    "com,example)/ 20200101000000 {\"s\":\"200\"}\n",
    "com,example)/about 20200101000000 {}\n",
    "com,example)/page 20200101000000 {}\n",
    "com,example)/page 20200102000000 {}\n",
    "com,test)/ 20200101000000 {}\n",
);

fn write_fixture(dir: &Path) -> std::path::PathBuf {
    let path = dir.join("fixture.cdxj");
    fs::write(&path, FIXTURE).unwrap();
    path
}

fn as_strings(lines: Vec<Vec<u8>>) -> Vec<String> {
    lines
        .into_iter()
        .map(|l| String::from_utf8(l).unwrap())
        .collect()
}

#[test]
fn exact_search_finds_both_page_captures() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());

    let key = SearchKey::new("com,example)/page", MatchType::Exact);
    let hits = as_strings(search_flat_file(&path, &key).unwrap());

    assert_eq!(
        hits,
        [
            "com,example)/page 20200101000000 {}",
            "com,example)/page 20200102000000 {}",
        ]
    );
}

#[test]
fn prefix_search_with_date_filter() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_fixture(dir.path());

    let key = SearchKey::new("com,example)/", MatchType::Prefix);
    let hits = search_flat_file(&path, &key).unwrap();

    let filter = LineFilter::new(Some("2020"), Some("20201231235959"), &[]).unwrap();
    let hits: Vec<_> = hits.into_iter().filter(|l| filter.accepts(l)).collect();

    assert_eq!(hits.len(), 4);
    assert!(as_strings(hits)
        .iter()
        .all(|l| l.starts_with("com,example)/")));
}

#[test]
fn zipnum_search_matches_flat_search() {
    let dir = tempfile::tempdir().unwrap();
    let flat = write_fixture(dir.path());

    let params = ZipNumParams {
        chunk_size: 2,
        base: "part".into(),
        ..ZipNumParams::default()
    };
    write_zipnum(
        Cursor::new(FIXTURE.as_bytes().to_vec()),
        dir.path(),
        &params,
        &CancelFlag::new(),
    )
    .unwrap();

    let idx = dir.path().join("part.idx");

    for (surt, mt) in [
        ("com,example)/page", MatchType::Exact),
        ("com,example)/", MatchType::Exact),
        ("com,example)/", MatchType::Prefix),
        ("com,example)/nothing", MatchType::Exact),
        ("com,test)/", MatchType::Exact),
        ("com,example)/z", MatchType::Host),
    ] {
        let key = SearchKey::new(surt, mt);
        let from_flat = search_flat_file(&flat, &key).unwrap();
        let from_zipnum = search_zipnum_index(&idx, &key).unwrap();
        assert_eq!(from_zipnum, from_flat, "query {surt:?} ({mt})");
    }
}

#[test]
fn zipnum_equivalence_holds_across_shard_boundaries() {
    let mut input = String::new();
    for host in ["aa", "bb", "cc", "dd"] {
        for page in 0..50 {
            for ts in ["20200101000000", "20210101000000"] {
                input.push_str(&format!(
                    "com,{host})/p{page:03} {ts} {{\"host\":\"{host}\"}}\n"
                ));
            }
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let flat = dir.path().join("all.cdxj");
    fs::write(&flat, &input).unwrap();

    let params = ZipNumParams {
        chunk_size: 7,
        shard_size: 512,
        base: "all".into(),
        idx_name: Some("all-zn.idx".into()),
        loc_name: Some("all-zn.loc".into()),
        ..ZipNumParams::default()
    };
    let summary = write_zipnum(
        Cursor::new(input.into_bytes()),
        dir.path(),
        &params,
        &CancelFlag::new(),
    )
    .unwrap();
    assert!(summary.shards.len() > 1);

    let idx = dir.path().join("all-zn.idx");

    for (surt, mt) in [
        ("com,bb)/p025", MatchType::Exact),
        ("com,bb)/", MatchType::Prefix),
        ("com,cc)/x", MatchType::Host),
        ("com,aa)/p000", MatchType::Exact),
        ("com,dd)/p049", MatchType::Exact),
        ("com,zz)/", MatchType::Prefix),
    ] {
        let key = SearchKey::new(surt, mt);
        let from_flat = search_flat_file(&flat, &key).unwrap();
        let from_zipnum = search_zipnum_index(&idx, &key).unwrap();
        assert_eq!(from_zipnum, from_flat, "query {surt:?} ({mt})");
    }
}

#[test]
fn loc_file_is_found_when_idx_and_loc_share_a_stem() {
    let dir = tempfile::tempdir().unwrap();

    let params = ZipNumParams {
        chunk_size: 2,
        base: "part".into(),
        ..ZipNumParams::default()
    };
    write_zipnum(
        Cursor::new(FIXTURE.as_bytes().to_vec()),
        dir.path(),
        &params,
        &CancelFlag::new(),
    )
    .unwrap();

    // searching through the generic dispatcher works on the idx path
    let key = SearchKey::new("com,test)/", MatchType::Exact);
    let hits = search_file(&dir.path().join("part.idx"), &key).unwrap();
    assert_eq!(as_strings(hits), ["com,test)/ 20200101000000 {}"]);
}

#[test]
fn results_pipeline_filters_sorts_dedupes_limits() {
    let dir = tempfile::tempdir().unwrap();
    let a = dir.path().join("a.cdxj");
    let b = dir.path().join("b.cdxj");

    fs::write(&a, "com,example)/ 20200101000000 {\"src\":\"a\"}\n").unwrap();
    fs::write(
        &b,
        concat!(
            "com,example)/ 20190101000000 {\"src\":\"b\"}\n",
            "com,example)/ 20200101000000 {\"src\":\"b\"}\n",
        ),
    )
    .unwrap();

    let key = SearchKey::new("com,example)/", MatchType::Exact);
    let mut all = Vec::new();
    for path in [&a, &b] {
        all.extend(search_flat_file(path, &key).unwrap());
    }
    assert_eq!(all.len(), 3);

    let filter = LineFilter::new(Some("2020"), None, &[]).unwrap();
    let filtered: Vec<_> = all.into_iter().filter(|l| filter.accepts(l)).collect();
    assert_eq!(filtered.len(), 2);

    let out = finish_results(filtered, true, true, None);
    // the duplicate (SURT, timestamp) pair collapses to the first seen
    assert_eq!(
        as_strings(out),
        ["com,example)/ 20200101000000 {\"src\":\"a\"}"]
    );
}
