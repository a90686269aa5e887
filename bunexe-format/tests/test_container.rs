use bunexe_format::{
    Container, ContainerErrorKind, Encoding, ErrorCategory, Loader, HEADER_SIZE, TRAILER,
};
use bunexe_testutils::{ContainerBuilder, TestModule};

type Error = Box<dyn std::error::Error>;

fn sample() -> ContainerBuilder {
    ContainerBuilder::new()
        .module(TestModule::new("/$bunfs/root/index.js", "console.log('hello');\n"))
        .module(
            TestModule::new("/$bunfs/root/styles.css", "body { margin: 0 }")
                .loader(4)
                .encoding(1),
        )
        .module(TestModule::new("/$bunfs/root/assets/logo.png", b"\x89PNG\r\n".to_vec()).loader(5))
        .entry_point(0, 0b10)
        .argv("--smol")
}

#[test]
fn test_geometry() -> Result<(), Error> {
    let built = sample().suffix(vec![0xcc; 300]).build();
    let container = Container::parse(&built.bytes)?;

    assert_eq!(container.trailer_offset(), built.trailer_offset as u64);
    assert_eq!(container.header_offset(), built.header_offset as u64);
    assert_eq!(container.blob_start(), built.blob_start as u64);
    assert_eq!(
        container.blob_start() + container.header().byte_count,
        container.header_offset()
    );
    assert_eq!(
        container.header_offset() + HEADER_SIZE as u64,
        container.trailer_offset()
    );
    assert_eq!(container.blob().len(), built.byte_count);

    Ok(())
}

#[test]
fn test_header_fields() -> Result<(), Error> {
    let built = sample().build();
    let container = Container::parse(&built.bytes)?;

    assert_eq!(container.module_count(), 3);
    assert_eq!(container.header().entry_point_id, 0);
    assert_eq!(container.header().flags, 0b10);
    assert_eq!(container.exec_argv()?, "--smol");

    Ok(())
}

#[test]
fn test_module_records() -> Result<(), Error> {
    let built = sample().build();
    let container = Container::parse(&built.bytes)?;

    let names = container
        .modules()
        .map(|module| Ok(container.module_name(&module?)?.into_owned()))
        .collect::<Result<Vec<_>, Error>>()?;
    similar_asserts::assert_eq!(
        names,
        [
            "/$bunfs/root/index.js",
            "/$bunfs/root/styles.css",
            "/$bunfs/root/assets/logo.png",
        ]
    );

    let css = container.module(1)?;
    assert_eq!(css.loader, Loader::Css);
    assert_eq!(css.encoding, Encoding::Latin1);
    assert_eq!(container.module_contents(&css)?, b"body { margin: 0 }");

    let png = container.module(2)?;
    assert_eq!(png.loader, Loader::File);
    assert_eq!(png.loader.extension(), ".bin");

    Ok(())
}

#[test]
fn test_contents_match_file() -> Result<(), Error> {
    let built = sample().build();
    let container = Container::parse(&built.bytes)?;

    for (index, module) in container.modules().enumerate() {
        let module = module?;
        let range = container.contents_file_range(&module);
        let in_file = &built.bytes[range.start as usize..range.end as usize];

        assert_eq!(container.module_contents(&module)?, in_file);
        assert_eq!(in_file, built.contents(index));
    }

    Ok(())
}

#[test]
fn test_open_file() -> Result<(), Error> {
    let built = sample().build();
    let file = tempfile::NamedTempFile::new()?;
    std::fs::write(file.path(), &built.bytes)?;

    let container = Container::open(file.path())?;
    assert_eq!(container.module_count(), 3);
    assert_eq!(container.blob(), Container::parse(&built.bytes)?.blob());

    Ok(())
}

#[test]
fn test_find_module() -> Result<(), Error> {
    let built = sample().build();
    let container = Container::parse(&built.bytes)?;

    let (index, module) = container
        .find_module("/$bunfs/root/styles.css")?
        .ok_or("module not found")?;
    assert_eq!(index, 1);
    assert_eq!(module.loader, Loader::Css);

    assert!(container.find_module("/$bunfs/root/missing.js")?.is_none());

    Ok(())
}

#[test]
fn test_index_out_of_range() -> Result<(), Error> {
    let built = sample().build();
    let container = Container::parse(&built.bytes)?;

    let error = container.module(3).unwrap_err();
    assert_eq!(error.kind(), ContainerErrorKind::IndexOutOfRange);

    Ok(())
}

#[test]
fn test_missing_trailer() {
    let mut built = sample().build();
    built.bytes.truncate(built.trailer_offset + TRAILER.len() - 1);

    let error = Container::parse(&built.bytes).unwrap_err();
    assert_eq!(error.kind(), ContainerErrorKind::MissingTrailer);
    assert_eq!(error.kind().category(), ErrorCategory::Format);
}

#[test]
fn test_no_room_for_header() {
    let mut data = b"tiny".to_vec();
    data.extend_from_slice(TRAILER);

    let error = Container::parse(&data).unwrap_err();
    assert_eq!(error.kind(), ContainerErrorKind::TruncatedInput);
}

#[test]
fn test_negative_blob_start() {
    let mut built = sample().build();
    let byte_count = (built.header_offset as u64 + 1).to_le_bytes();
    built.bytes[built.header_offset..built.header_offset + 8].copy_from_slice(&byte_count);

    let error = Container::parse(&built.bytes).unwrap_err();
    assert_eq!(error.kind(), ContainerErrorKind::CorruptContainer);
}

#[test]
fn test_table_out_of_bounds() {
    let mut built = sample().build();
    // modules.length
    let field = built.header_offset + 12;
    built.bytes[field..field + 4].copy_from_slice(&u32::MAX.to_le_bytes());

    let error = Container::parse(&built.bytes).unwrap_err();
    assert_eq!(error.kind(), ContainerErrorKind::PointerOutOfBounds);
}

#[test]
fn test_partial_module_table() {
    let built = ContainerBuilder::new()
        .module(TestModule::new("/$bunfs/root/a.js", "a"))
        .module(TestModule::new("/$bunfs/root/b.js", "b"))
        .declared_table_len(130)
        .build();

    let error = Container::parse(&built.bytes).unwrap_err();
    assert_eq!(error.kind(), ContainerErrorKind::MalformedModuleTable);
    assert_eq!(error.kind().category(), ErrorCategory::Constraint);
}

#[test]
fn test_contents_out_of_bounds() -> Result<(), Error> {
    let mut built = ContainerBuilder::new()
        .module(TestModule::new("/$bunfs/root/a.js", "console.log(1)"))
        .build();

    // The only record starts right after name and contents; bump contents.length.
    let record = built.blob_start + "/$bunfs/root/a.js".len() + "console.log(1)".len();
    let field = record + 12;
    built.bytes[field..field + 4].copy_from_slice(&0xffff_u32.to_le_bytes());

    let container = Container::parse(&built.bytes)?;
    let module = container.module(0)?;
    let error = container.module_contents(&module).unwrap_err();
    assert_eq!(error.kind(), ContainerErrorKind::PointerOutOfBounds);

    Ok(())
}

#[test]
fn test_rightmost_trailer() -> Result<(), Error> {
    let inner = sample().build();
    let built = ContainerBuilder::new()
        .prefix(inner.bytes)
        .module(TestModule::new("/$bunfs/root/outer.js", "outer"))
        .build();

    let container = Container::parse(&built.bytes)?;
    assert_eq!(container.trailer_offset(), built.trailer_offset as u64);
    assert_eq!(container.module_count(), 1);

    Ok(())
}
