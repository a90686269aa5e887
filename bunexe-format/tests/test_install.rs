use std::fs;

use bunexe_format::install::{
    backup_path, patch_file, restore_file, InstallErrorKind, ModuleSelector, PatchRequest,
};
use bunexe_format::Container;
use bunexe_testutils::{BuiltContainer, ContainerBuilder, TestModule};

type Error = Box<dyn std::error::Error>;

fn executable() -> BuiltContainer {
    ContainerBuilder::new()
        .module(TestModule::new("/$bunfs/root/cli.js", "run('__PLUGIN_PATH__');"))
        .module(TestModule::new("/$bunfs/root/other.js", "other"))
        .build()
}

fn request(replacement: &str) -> PatchRequest {
    PatchRequest {
        module: ModuleSelector::Name("/$bunfs/root/cli.js".into()),
        marker: b"__PLUGIN_PATH__".to_vec(),
        replacement: replacement.as_bytes().to_vec(),
    }
}

fn contents(data: &[u8], index: usize) -> Result<Vec<u8>, Error> {
    let container = Container::parse(data)?;
    let module = container.module(index)?;
    Ok(container.module_contents(&module)?.to_vec())
}

#[test]
fn test_patch_and_restore() -> Result<(), Error> {
    let built = executable();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app");
    fs::write(&path, &built.bytes)?;

    let outcome = patch_file(&path, &request("/opt/x"))?;
    assert_eq!(outcome.module_index, 0);
    assert_eq!(outcome.module_name, "/$bunfs/root/cli.js");
    assert_eq!(outcome.marker_offset, 5);
    assert!(!outcome.restored);
    assert_eq!(outcome.backup_path, backup_path(&path));

    let patched = fs::read(&path)?;
    assert_eq!(patched.len(), built.bytes.len());
    similar_asserts::assert_eq!(
        String::from_utf8(contents(&patched, 0)?)?,
        "run('/opt/x         ');"
    );
    assert_eq!(contents(&patched, 1)?, b"other");
    assert_eq!(fs::read(backup_path(&path))?, built.bytes);

    let removed = restore_file(&path)?;
    assert_eq!(removed, backup_path(&path));
    assert!(!removed.exists());
    assert_eq!(fs::read(&path)?, built.bytes);

    Ok(())
}

#[test]
fn test_repatch_starts_from_original() -> Result<(), Error> {
    let built = executable();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app");
    fs::write(&path, &built.bytes)?;

    patch_file(&path, &request("/first"))?;
    let outcome = patch_file(&path, &request("/second"))?;
    assert!(outcome.restored);

    assert_eq!(contents(&fs::read(&path)?, 0)?, b"run('/second        ');");
    assert_eq!(fs::read(backup_path(&path))?, built.bytes);

    Ok(())
}

#[test]
fn test_failed_patch_writes_nothing() -> Result<(), Error> {
    let built = executable();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app");
    fs::write(&path, &built.bytes)?;

    let request = PatchRequest {
        module: ModuleSelector::Index(1),
        marker: b"other".to_vec(),
        replacement: b"another".to_vec(),
    };
    let error = patch_file(&path, &request).unwrap_err();
    assert_eq!(error.kind(), InstallErrorKind::Container);
    assert!(!error.is_recoverable());

    assert!(!backup_path(&path).exists());
    assert_eq!(fs::read(&path)?, built.bytes);

    Ok(())
}

#[test]
fn test_unknown_module() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app");
    fs::write(&path, executable().bytes)?;

    let mut request = request("x");
    request.module = ModuleSelector::Name("/$bunfs/root/missing.js".into());
    let error = patch_file(&path, &request).unwrap_err();
    assert_eq!(error.kind(), InstallErrorKind::Container);

    request.module = ModuleSelector::Index(5);
    let error = patch_file(&path, &request).unwrap_err();
    assert_eq!(error.kind(), InstallErrorKind::Container);

    Ok(())
}

#[test]
fn test_restore_without_backup() -> Result<(), Error> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app");
    fs::write(&path, executable().bytes)?;

    let error = restore_file(&path).unwrap_err();
    assert_eq!(error.kind(), InstallErrorKind::MissingBackup);

    Ok(())
}

#[cfg(unix)]
#[test]
fn test_keeps_permissions() -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app");
    fs::write(&path, executable().bytes)?;
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755))?;

    patch_file(&path, &request("/opt/x"))?;
    assert_eq!(fs::metadata(&path)?.permissions().mode() & 0o777, 0o755);
    assert_eq!(
        fs::metadata(backup_path(&path))?.permissions().mode() & 0o777,
        0o755
    );

    Ok(())
}

#[cfg(unix)]
#[test]
fn test_backup_failure_keeps_target() -> Result<(), Error> {
    use std::os::unix::fs::PermissionsExt;

    let built = executable();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("app");
    fs::write(&path, &built.bytes)?;
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o555))?;

    // Permission checks do not apply to privileged users.
    if fs::write(dir.path().join("writable"), b"").is_ok() {
        fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755))?;
        return Ok(());
    }

    let result = patch_file(&path, &request("/opt/x"));
    fs::set_permissions(dir.path(), fs::Permissions::from_mode(0o755))?;

    let error = result.unwrap_err();
    assert_eq!(error.kind(), InstallErrorKind::BackupFailed);
    assert!(!error.is_recoverable());
    assert!(error.hint().is_some());
    assert!(!backup_path(&path).exists());
    assert_eq!(fs::read(&path)?, built.bytes);

    Ok(())
}
