//! End-to-end session workflow
//!
//! Open a root, load, edit through path expressions, save in every mode,
//! then reopen to check what landed on disk.

use lenstree::{Error, ErrorCode, FileErrorKind, Session, SessionFlags, SessionOptions};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const HOSTS: &str = "# static table\n127.0.0.1 localhost\n192.168.0.10\tgateway gw # router\n";

fn setup_root() -> TempDir {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("etc/selinux")).unwrap();
    fs::write(dir.path().join("etc/hosts"), HOSTS).unwrap();
    fs::write(
        dir.path().join("etc/selinux/semanage.conf"),
        "module-store = direct\nexpand-check=0\n",
    )
    .unwrap();
    dir
}

fn open(root: &Path, flags: SessionFlags) -> Session {
    Session::open(SessionOptions::new(root).with_flags(flags)).unwrap()
}

fn read(root: &Path, rel: &str) -> String {
    fs::read_to_string(root.join(rel)).unwrap()
}

#[test]
fn loads_every_autoloaded_file() {
    let dir = setup_root();
    let mut aug = open(dir.path(), SessionFlags::default());

    let mut files = aug.loaded_files().unwrap();
    files.sort();
    assert_eq!(files, vec!["/etc/hosts", "/etc/selinux/semanage.conf"]);
    assert_eq!(
        aug.get("/files/etc/hosts/*[canonical = 'gateway']/ipaddr")
            .unwrap()
            .as_deref(),
        Some("192.168.0.10")
    );
    assert_eq!(
        aug.get("/files/etc/selinux/semanage.conf/expand-check")
            .unwrap()
            .as_deref(),
        Some("0")
    );
    assert_eq!(aug.matches("/files/etc/hosts/*/alias").unwrap().len(), 1);
}

#[test]
fn edit_save_and_reopen() {
    let dir = setup_root();
    let mut aug = open(dir.path(), SessionFlags::default());

    aug.set("/files/etc/hosts/1/canonical", Some("box")).unwrap();
    aug.set("/files/etc/selinux/semanage.conf/expand-check", Some("1"))
        .unwrap();
    let report = aug.save().unwrap();
    assert_eq!(report.saved.len(), 2);

    assert_eq!(
        read(dir.path(), "etc/hosts"),
        "# static table\n127.0.0.1 box\n192.168.0.10\tgateway gw # router\n"
    );
    assert_eq!(
        read(dir.path(), "etc/selinux/semanage.conf"),
        "module-store = direct\nexpand-check=1\n"
    );

    assert_eq!(aug.matches("/augeas/events/saved").unwrap().len(), 2);
    let again = aug.save().unwrap();
    assert!(again.saved.is_empty());

    let mut reopened = open(dir.path(), SessionFlags::default());
    assert_eq!(
        reopened.get("/files/etc/hosts/1/canonical").unwrap().as_deref(),
        Some("box")
    );
}

#[test]
fn appended_alias_survives_reload() {
    let dir = setup_root();
    let mut aug = open(dir.path(), SessionFlags::default());
    aug.set("/files/etc/hosts/1/alias", Some("web")).unwrap();
    aug.save().unwrap();

    let text = read(dir.path(), "etc/hosts");
    assert!(text.starts_with("# static table\n127.0.0.1 localhost"));
    assert!(text.contains("web"));
    assert!(text.ends_with("192.168.0.10\tgateway gw # router\n"));

    let mut reopened = open(dir.path(), SessionFlags::default());
    assert_eq!(
        reopened.get("/files/etc/hosts/1/alias").unwrap().as_deref(),
        Some("web")
    );
}

#[test]
fn backup_and_newfile_modes() {
    let dir = setup_root();
    let mut aug = open(
        dir.path(),
        SessionFlags {
            save_backup: true,
            ..Default::default()
        },
    );
    aug.set("/files/etc/hosts/1/ipaddr", Some("127.0.1.1")).unwrap();
    aug.save().unwrap();
    assert_eq!(read(dir.path(), "etc/hosts.orig"), HOSTS);
    assert!(read(dir.path(), "etc/hosts").contains("127.0.1.1 localhost"));

    // Switch mode through the metadata subtree.
    aug.set("/augeas/save", Some("newfile")).unwrap();
    aug.set("/files/etc/hosts/1/ipaddr", Some("127.0.2.2")).unwrap();
    let report = aug.save().unwrap();
    assert!(report.saved[0].target.ends_with("etc/hosts.new"));
    assert!(read(dir.path(), "etc/hosts").contains("127.0.1.1"));
    assert!(read(dir.path(), "etc/hosts.new").contains("127.0.2.2"));
}

#[test]
fn noop_mode_reports_without_writing() {
    let dir = setup_root();
    let mut aug = open(
        dir.path(),
        SessionFlags {
            save_noop: true,
            ..Default::default()
        },
    );
    aug.rm("/files/etc/hosts/#comment").unwrap();
    let report = aug.save().unwrap();
    assert!(report.saved.is_empty());
    assert_eq!(report.pending.len(), 1);
    assert_eq!(report.pending[0].path, "/etc/hosts");
    assert!(!report.pending[0].after.as_deref().unwrap().contains("static"));
    assert_eq!(read(dir.path(), "etc/hosts"), HOSTS);
    assert!(aug.matches("/augeas/events/saved").unwrap().is_empty());
}

#[test]
fn unparseable_file_does_not_block_others() {
    let dir = setup_root();
    fs::write(
        dir.path().join("etc/selinux/semanage.conf"),
        "good = 1\n!!! not a pair\n",
    )
    .unwrap();
    let mut aug = open(dir.path(), SessionFlags::default());

    assert_eq!(aug.loaded_files().unwrap(), vec!["/etc/hosts"]);
    let errors = aug.file_errors().unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].kind, FileErrorKind::ParseFailed);
    assert_eq!(errors[0].position.unwrap().line, 2);
    assert_eq!(
        aug.get("/augeas/files/etc/selinux/semanage.conf/error")
            .unwrap()
            .as_deref(),
        Some("parse_failed")
    );
    assert!(aug
        .exists("/augeas/files/etc/selinux/semanage.conf/error/message")
        .unwrap());
    assert!(!aug.exists("/files/etc/selinux").unwrap());
}

#[test]
fn failed_put_leaves_file_and_reports_error() {
    let dir = setup_root();
    let mut aug = open(dir.path(), SessionFlags::default());
    aug.set("/files/etc/hosts/1/canonical", Some("has space")).unwrap();
    aug.set("/files/etc/selinux/semanage.conf/expand-check", Some("1"))
        .unwrap();

    let err = aug.save().unwrap_err();
    assert!(matches!(err, Error::LensPut(_)));
    assert_eq!(aug.last_error().code, ErrorCode::Syntax);
    assert_eq!(read(dir.path(), "etc/hosts"), HOSTS);
    // The other file was still written.
    assert!(read(dir.path(), "etc/selinux/semanage.conf").contains("expand-check=1"));
    assert_eq!(
        aug.get("/augeas/files/etc/hosts/error").unwrap().as_deref(),
        Some("put_failed")
    );
}

#[test]
fn removing_a_file_node_deletes_the_file() {
    let dir = setup_root();
    let mut aug = open(
        dir.path(),
        SessionFlags {
            save_backup: true,
            ..Default::default()
        },
    );
    assert_eq!(aug.rm("/files/etc/selinux/semanage.conf").unwrap(), 3);
    aug.save().unwrap();
    assert!(!dir.path().join("etc/selinux/semanage.conf").exists());
    assert!(dir.path().join("etc/selinux/semanage.conf.orig").exists());
}

#[test]
fn custom_transform_creates_new_file() {
    let dir = setup_root();
    let mut aug = open(
        dir.path(),
        SessionFlags {
            no_load: true,
            no_module_autoload: true,
            ..Default::default()
        },
    );
    aug.add_transform("Simplevars.lns", Some("app"), &["/srv/app/*.conf"], &[])
        .unwrap();
    aug.load().unwrap();
    assert!(aug.loaded_files().unwrap().is_empty());

    aug.set("/files/srv/app/main.conf/listen", Some("8080")).unwrap();
    aug.save().unwrap();
    assert_eq!(read(dir.path(), "srv/app/main.conf"), "listen = 8080\n");
}

#[test]
fn lens_modules_from_load_path() {
    let dir = setup_root();
    let lenses = TempDir::new().unwrap();
    fs::write(
        lenses.path().join("colon.toml"),
        r#"
module = "Colon"

[lenses.entry]
type = "subtree"
body = { type = "concat", parts = [
    { type = "key", re = "[a-z]+" },
    { type = "del", re = ":", default = ":" },
    { type = "store", re = "[^\n]*" },
    { type = "literal", text = "\n" },
] }

[lenses.lns]
type = "star"
body = { type = "ref", name = "entry" }

[autoload]
lens = "lns"
incl = ["/etc/colon.conf"]
"#,
    )
    .unwrap();
    fs::write(dir.path().join("etc/colon.conf"), "user:alice\nshell:/bin/sh\n").unwrap();

    let options = SessionOptions::new(dir.path())
        .with_load_paths(vec![lenses.path().to_path_buf()]);
    let mut aug = Session::open(options).unwrap();
    assert!(aug.lenses().unwrap().contains(&"Colon.lns".to_string()));
    assert_eq!(
        aug.get("/files/etc/colon.conf/shell").unwrap().as_deref(),
        Some("/bin/sh")
    );

    aug.set("/files/etc/colon.conf/user", Some("bob")).unwrap();
    aug.save().unwrap();
    assert_eq!(read(dir.path(), "etc/colon.conf"), "user:bob\nshell:/bin/sh\n");
}

#[test]
fn spans_point_into_the_file() {
    let dir = setup_root();
    let mut aug = open(
        dir.path(),
        SessionFlags {
            enable_span: true,
            ..Default::default()
        },
    );
    let span = aug.span("/files/etc/hosts/1/canonical").unwrap();
    let text = read(dir.path(), "etc/hosts");
    assert_eq!(&text[span.value.start..span.value.end], "localhost");
    assert!(span.filename.ends_with("etc/hosts"));

    let mut plain = open(dir.path(), SessionFlags::default());
    assert!(matches!(
        plain.span("/files/etc/hosts/1/canonical"),
        Err(Error::NoSpanInfo { .. })
    ));
}

#[test]
fn variables_and_moves() {
    let dir = setup_root();
    let mut aug = open(dir.path(), SessionFlags::default());
    assert_eq!(aug.define_variable("hosts", Some("/files/etc/hosts/*[ipaddr]")).unwrap(), 2);
    assert_eq!(aug.matches("$hosts/canonical").unwrap().len(), 2);

    aug.mv("/files/etc/hosts/2/alias", "/files/etc/hosts/1/alias").unwrap();
    assert_eq!(aug.get("/files/etc/hosts/1/alias").unwrap().as_deref(), Some("gw"));
    assert!(!aug.exists("/files/etc/hosts/2/alias").unwrap());

    let err = aug
        .mv("/files/etc/hosts/1", "/files/etc/hosts/1/canonical/x")
        .unwrap_err();
    assert!(matches!(err, Error::InvalidMove { .. }));
}

#[test]
fn append_to_file_without_final_newline() {
    let dir = setup_root();
    fs::write(dir.path().join("etc/hosts"), "127.0.0.1 localhost").unwrap();
    let mut aug = open(dir.path(), SessionFlags::default());

    aug.set("/files/etc/hosts/2/ipaddr", Some("10.0.0.2")).unwrap();
    aug.set("/files/etc/hosts/2/canonical", Some("gw")).unwrap();
    aug.save().unwrap();
    assert_eq!(
        read(dir.path(), "etc/hosts"),
        "127.0.0.1 localhost\n10.0.0.2\tgw\n"
    );

    let mut reopened = open(dir.path(), SessionFlags::default());
    assert!(reopened.file_errors().unwrap().is_empty());
    assert_eq!(
        reopened.get("/files/etc/hosts/2/ipaddr").unwrap().as_deref(),
        Some("10.0.0.2")
    );
    assert_eq!(
        reopened.get("/files/etc/hosts/1/canonical").unwrap().as_deref(),
        Some("localhost")
    );
}

#[test]
fn spans_enabled_through_metadata() {
    let dir = setup_root();
    let mut aug = open(dir.path(), SessionFlags::default());
    assert!(aug.span("/files/etc/hosts/1/canonical").is_err());

    aug.set("/augeas/span", Some("enable")).unwrap();
    aug.load().unwrap();
    let span = aug.span("/files/etc/hosts/1/canonical").unwrap();
    let text = read(dir.path(), "etc/hosts");
    assert_eq!(&text[span.value.start..span.value.end], "localhost");
    assert_eq!(span.node.start, span.value.start);
}
