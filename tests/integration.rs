//! End-to-end compile and query tests.

use iptool::{
    AddressKind, CachedDatabase, Compiler, Database, Error, FieldCodec, MemorySource,
    ReaderState, Value,
};
use std::net::Ipv4Addr;

fn info_compiler() -> Compiler {
    let mut compiler = Compiler::new();
    let info = compiler
        .define_register(
            "info",
            MemorySource::new("info")
                .with_row(["1", "10", "first"])
                .with_row(["2", "20", "second"])
                .with_row(["3", "30", "third"])
                .with_row(["4", "40", "fourth"]),
            Some(1),
        )
        .unwrap();
    compiler.add_field(info, "interval", 2, FieldCodec::unsigned()).unwrap();
    compiler.add_field(info, "caption", 3, FieldCodec::text()).unwrap();

    let net = compiler
        .define_network(
            MemorySource::new("quarters")
                .with_row(["0.0.0.0/2", "1"])
                .with_row(["64.0.0.0/2", "2"])
                .with_row(["128.0.0.0/2", "3"])
                .with_row(["192.0.0.0/2", "4"]),
            AddressKind::Prefix,
            1,
            1,
        )
        .unwrap();
    compiler.map_register(net, 2, "info").unwrap();
    compiler
}

fn open(compiler: &Compiler) -> Database {
    Database::from_bytes(compiler.compile_to_bytes().unwrap()).unwrap()
}

#[test]
fn test_quarter_ranges() {
    let db = open(&info_compiler());

    let lookup = db.find_str("64.0.10.0").unwrap();
    assert_eq!(lookup.first, Ipv4Addr::new(64, 0, 0, 0));
    assert_eq!(lookup.last, Ipv4Addr::new(127, 255, 255, 255));
    let info = lookup.register("info").unwrap();
    assert_eq!(info.get("interval"), Some(&Value::Int(20)));
    assert_eq!(info.get("caption"), Some(&Value::Text("second".into())));

    let lookup = db.find_str("0.0.0.1").unwrap();
    assert_eq!(lookup.first, Ipv4Addr::new(0, 0, 0, 0));
    assert_eq!(lookup.last, Ipv4Addr::new(63, 255, 255, 255));
    assert_eq!(
        lookup.register("info").unwrap().get("caption"),
        Some(&Value::Text("first".into()))
    );

    let lookup = db.find(Ipv4Addr::BROADCAST).unwrap();
    assert_eq!(lookup.first, Ipv4Addr::new(192, 0, 0, 0));
    assert_eq!(lookup.last, Ipv4Addr::BROADCAST);
    assert_eq!(db.record_count().unwrap(), 4);
}

#[test]
fn test_adjacent_identical_ranges_merge() {
    let mut compiler = Compiler::new();
    let country = compiler
        .define_register("country", MemorySource::new("c").with_row(["1", "ru"]), Some(1))
        .unwrap();
    compiler.add_field(country, "code", 2, FieldCodec::text()).unwrap();
    let net = compiler
        .define_network(
            MemorySource::new("n")
                .with_row(["10.0.0.0", "10.0.0.255", "1"])
                .with_row(["10.0.1.0", "10.0.1.255", "1"]),
            AddressKind::Dotted,
            1,
            2,
        )
        .unwrap();
    compiler.map_register(net, 3, "country").unwrap();

    let db = open(&compiler);
    let lookup = db.find_str("10.0.0.77").unwrap();
    assert_eq!(lookup.first, Ipv4Addr::new(10, 0, 0, 0));
    assert_eq!(lookup.last, Ipv4Addr::new(10, 0, 1, 255));
    // before, merged range, after
    assert_eq!(db.record_count().unwrap(), 3);
}

#[test]
fn test_unmapped_address_returns_default_row() {
    let mut compiler = Compiler::new();
    let info = compiler
        .define_register("info", MemorySource::new("i").with_row(["7", "x"]), Some(1))
        .unwrap();
    compiler.add_field(info, "interval", 1, FieldCodec::unsigned()).unwrap();
    compiler.add_field(info, "caption", 2, FieldCodec::text()).unwrap();
    let net = compiler
        .define_network(
            MemorySource::new("n").with_row(["8.8.8.0/24", "7"]),
            AddressKind::Prefix,
            1,
            1,
        )
        .unwrap();
    compiler.map_register(net, 2, "info").unwrap();

    let db = open(&compiler);
    let lookup = db.find_str("1.2.3.4").unwrap();
    let row = lookup.register("info").unwrap();
    assert!(row.is_default());
    assert_eq!(row.get("interval"), Some(&Value::Int(0)));
    assert_eq!(row.get("caption"), Some(&Value::Text(String::new())));

    let lookup = db.find_str("8.8.8.8").unwrap();
    assert_eq!(
        lookup.register("info").unwrap().get("caption"),
        Some(&Value::Text("x".into()))
    );
}

#[test]
fn test_relations_keep_transitive_rows_only() {
    let mut compiler = Compiler::new();
    let country = compiler
        .define_register(
            "country",
            MemorySource::new("countries")
                .with_row(["1", "ru"])
                .with_row(["2", "de"])
                .with_row(["3", "fr"]),
            Some(1),
        )
        .unwrap();
    compiler.add_field(country, "code", 2, FieldCodec::text()).unwrap();

    let city = compiler
        .define_register(
            "city",
            MemorySource::new("cities")
                .with_row(["100", "Moscow", "1"])
                .with_row(["200", "Berlin", "2"]),
            Some(1),
        )
        .unwrap();
    compiler.add_field(city, "name", 2, FieldCodec::text()).unwrap();
    compiler.add_field(city, "country", 3, FieldCodec::unsigned()).unwrap();
    compiler.declare_relation("city", "country", "country").unwrap();

    let net = compiler
        .define_network(
            MemorySource::new("n").with_row(["5.0.0.0/8", "100"]),
            AddressKind::Prefix,
            1,
            1,
        )
        .unwrap();
    compiler.map_register(net, 2, "city").unwrap();

    let db = open(&compiler);
    let countries = db.dump_register("country").unwrap();
    assert_eq!(countries.len(), 1);
    assert_eq!(countries[0].get("code"), Some(&Value::Text("ru".into())));

    let cities = db.dump_register("city").unwrap();
    assert_eq!(cities.len(), 1);
    assert_eq!(cities[0].get("name"), Some(&Value::Text("Moscow".into())));

    let relations = db.relations().unwrap();
    assert_eq!(relations.len(), 1);
    assert_eq!(relations[0].parent, "city");
    assert_eq!(relations[0].attribute, "country");
    assert_eq!(relations[0].child, "country");
}

#[test]
fn test_relation_cycle_terminates() {
    let mut compiler = Compiler::new();
    let node = compiler
        .define_register(
            "node",
            MemorySource::new("nodes")
                .with_row(["1", "a", "2"])
                .with_row(["2", "b", "1"])
                .with_row(["3", "c", "1"]),
            Some(1),
        )
        .unwrap();
    compiler.add_field(node, "label", 2, FieldCodec::text()).unwrap();
    compiler.add_field(node, "next", 3, FieldCodec::unsigned()).unwrap();
    compiler.declare_relation("node", "next", "node").unwrap();

    let net = compiler
        .define_network(
            MemorySource::new("n").with_row(["9.9.9.9", "1"]),
            AddressKind::Dotted,
            1,
            1,
        )
        .unwrap();
    compiler.map_register(net, 2, "node").unwrap();

    let db = open(&compiler);
    let labels: Vec<_> = db
        .dump_register("node")
        .unwrap()
        .iter()
        .filter_map(|row| row.get("label").and_then(Value::as_str).map(str::to_string))
        .collect();
    assert_eq!(labels, vec!["a", "b"]);
}

#[test]
fn test_records_cover_address_space() {
    let mut compiler = Compiler::new();
    let asn = compiler
        .define_register(
            "asn",
            MemorySource::new("asn")
                .with_row(["1", "64500"])
                .with_row(["2", "64501"])
                .with_row(["3", "64502"]),
            Some(1),
        )
        .unwrap();
    compiler.add_field(asn, "number", 2, FieldCodec::unsigned()).unwrap();
    let net = compiler
        .define_network(
            MemorySource::new("n")
                .with_row(["10.0.0.0/8", "1"])
                .with_row(["10.20.0.0/16", "2"])
                .with_row(["10.20.30.0/24", "3"])
                .with_row(["172.16.0.0 - 172.31.255.255", "2"])
                .with_row(["255.255.255.255", "3"]),
            AddressKind::Prefix,
            1,
            1,
        )
        .unwrap();
    compiler.map_register(net, 2, "asn").unwrap();

    let db = open(&compiler);
    let mut next = 0u64;
    let mut walked = 0;
    while next <= u32::MAX as u64 {
        let lookup = db.find(Ipv4Addr::from(next as u32)).unwrap();
        assert_eq!(u32::from(lookup.first) as u64, next);
        assert!(lookup.last >= lookup.first);
        next = u32::from(lookup.last) as u64 + 1;
        walked += 1;
    }
    assert_eq!(walked, db.record_count().unwrap());

    let number = |addr: &str| {
        db.find_str(addr)
            .unwrap()
            .register("asn")
            .unwrap()
            .get("number")
            .cloned()
    };
    assert_eq!(number("10.1.1.1"), Some(Value::Int(64500)));
    assert_eq!(number("10.20.1.1"), Some(Value::Int(64501)));
    assert_eq!(number("10.20.30.40"), Some(Value::Int(64502)));
    assert_eq!(number("10.21.0.0"), Some(Value::Int(64500)));
    assert_eq!(number("172.20.0.1"), Some(Value::Int(64501)));
    assert_eq!(number("255.255.255.255"), Some(Value::Int(64502)));
    assert_eq!(number("255.255.255.254"), Some(Value::Int(0)));
}

#[test]
fn test_metadata_round_trip() {
    let mut compiler = info_compiler();
    compiler.set_author("Range Maintainers");
    compiler.set_license("Public domain.\nNo warranty.");
    compiler.set_creation_time(1_600_000_000);

    let about = open(&compiler).about().unwrap();
    assert_eq!(about.version, 2);
    assert_eq!(about.author, "Range Maintainers");
    assert_eq!(about.license, "Public domain.\nNo warranty.");
    assert_eq!(about.created, 1_600_000_000);
    assert_eq!(about.network_count, 4);
    assert_eq!(
        about.registers.get("info"),
        Some(&vec!["interval".to_string(), "caption".to_string()])
    );
}

#[test]
fn test_format_version_one_omits_relations() {
    let mut compiler = info_compiler();
    compiler.set_format_version(1).unwrap();
    let db = open(&compiler);
    assert_eq!(db.about().unwrap().version, 1);
    assert!(db.relations().unwrap().is_empty());
    assert_eq!(
        db.find_str("200.1.1.1").unwrap().register("info").unwrap().get("caption"),
        Some(&Value::Text("fourth".into()))
    );
}

#[test]
fn test_failed_compile_leaves_no_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("broken.dat");

    let mut compiler = info_compiler();
    let net = compiler
        .define_network(
            MemorySource::new("bad").with_row(["999.0.0.0", "1"]),
            AddressKind::Dotted,
            1,
            1,
        )
        .unwrap();
    compiler.map_register(net, 2, "info").unwrap();

    let err = compiler.compile(&output).unwrap_err();
    assert!(matches!(err, Error::Ingest { .. }));
    assert!(!output.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
}

#[test]
fn test_compile_to_path_and_load() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("geo.dat");
    let report = info_compiler().compile(&output).unwrap();
    assert_eq!(report.record_count, 4);
    assert_eq!(report.register_items, vec![("info".to_string(), 4)]);
    assert_eq!(report.file_size as u64, std::fs::metadata(&output).unwrap().len());

    let db = Database::load(&output);
    assert_eq!(db.state(), ReaderState::Ready);

    let missing = Database::load(&dir.path().join("missing.dat"));
    assert!(matches!(missing.state(), ReaderState::Failed(_)));
    assert!(matches!(
        missing.find_str("1.1.1.1"),
        Err(Error::ReaderFailed(_))
    ));
}

#[test]
fn test_cached_database_reload() {
    let dir = tempfile::tempdir().unwrap();
    let output = dir.path().join("geo.dat");
    info_compiler().compile(&output).unwrap();

    let cached = CachedDatabase::open(&output).unwrap();
    let caption = |db: &CachedDatabase| {
        db.find_str("130.0.0.1")
            .unwrap()
            .register("info")
            .unwrap()
            .get("caption")
            .cloned()
    };
    assert_eq!(caption(&cached), Some(Value::Text("third".into())));
    // served from cache
    assert_eq!(caption(&cached), Some(Value::Text("third".into())));

    let mut compiler = Compiler::new();
    let info = compiler
        .define_register("info", MemorySource::new("i").with_row(["1", "replaced"]), Some(1))
        .unwrap();
    compiler.add_field(info, "caption", 2, FieldCodec::text()).unwrap();
    let net = compiler
        .define_network(
            MemorySource::new("n").with_row(["128.0.0.0/1", "1"]),
            AddressKind::Prefix,
            1,
            1,
        )
        .unwrap();
    compiler.map_register(net, 2, "info").unwrap();
    compiler.compile(&output).unwrap();

    let before = cached.generation();
    cached.reload(&output).unwrap();
    assert_eq!(cached.generation(), before + 1);
    assert_eq!(caption(&cached), Some(Value::Text("replaced".into())));
}
