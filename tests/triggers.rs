// tests/triggers.rs

//! Trigger firing in both directions, argument arithmetic, and dedup

mod common;

use common::{add_install, fixture, header};
use stagehand::{Goal, Header, SenseFlags, Tag};
use std::fs;

/// Give `h` one trigger entry watching `name` with `sense`, whose script
/// appends its arguments to `log` (relative to the install root)
fn watch(h: &mut Header, name: &str, sense: SenseFlags, log: &str) {
    h.put_str_vec(Tag::TriggerNames, vec![name.into()]);
    h.put_u32_vec(Tag::TriggerFlags, vec![sense.bits()]);
    h.put_str_vec(Tag::TriggerVersions, vec![String::new()]);
    h.put_u32_vec(Tag::TriggerIndexes, vec![0]);
    h.put_str_vec(
        Tag::TriggerScripts,
        vec![format!("echo \"$1:$2\" >> {}", log)],
    );
    h.put_str_vec(Tag::TriggerScriptProgs, vec![String::new()]);
}

#[test]
fn outbound_install_trigger_fires_in_post() {
    let mut fx = fixture();

    // an installed package watching for "app" arriving
    let mut watcher = header("watcher", "1.0");
    watch(&mut watcher, "app", SenseFlags::TRIGGER_IN, "outbound.log");
    fx.ts.db().add(&mut watcher).unwrap();

    let h = header("app", "1.0");
    let ix = add_install(
        &mut fx.ts,
        fx.tmp.path(),
        &h,
        &[("/usr/bin/app", b"bin".as_slice())],
    );
    stagehand::run(&fx.ts, fx.ts.element(ix).unwrap(), Goal::Install).unwrap();

    // arg1 = installed count of the watcher, arg2 = installed count of
    // the package that set it off (counted after its database add)
    let log = fs::read_to_string(fx.root.join("outbound.log")).unwrap();
    assert_eq!(log.trim(), "1:1");
}

#[test]
fn pre_install_trigger_sees_the_old_world() {
    let mut fx = fixture();

    let mut watcher = header("watcher", "1.0");
    watch(&mut watcher, "app", SenseFlags::TRIGGER_PREIN, "prein.log");
    fx.ts.db().add(&mut watcher).unwrap();

    let h = header("app", "1.0");
    let ix = add_install(
        &mut fx.ts,
        fx.tmp.path(),
        &h,
        &[("/usr/bin/app", b"bin".as_slice())],
    );
    stagehand::run(&fx.ts, fx.ts.element(ix).unwrap(), Goal::Install).unwrap();

    // fired during PRE: the incoming package is not installed yet
    let log = fs::read_to_string(fx.root.join("prein.log")).unwrap();
    assert_eq!(log.trim(), "1:0");

    // the trigger script ran before the payload phase opened
    let trigger_pos = fx
        .recorder
        .position(|e| {
            matches!(e, common::Seen::Script { tag, .. } if tag == "trigger-pre-install")
        })
        .unwrap();
    let install_pos = fx
        .recorder
        .position(|e| {
            matches!(
                e,
                common::Seen::Progress {
                    kind: stagehand::CallbackKind::InstallStart,
                    ..
                }
            )
        })
        .unwrap();
    assert!(trigger_pos < install_pos);
}

#[test]
fn inbound_triggers_fire_for_watched_installed_packages() {
    let mut fx = fixture();

    // the watched package is already installed
    let mut lib = header("lib", "1.0");
    fx.ts.db().add(&mut lib).unwrap();

    // the incoming package watches it
    let mut h = header("tool", "1.0");
    watch(&mut h, "lib", SenseFlags::TRIGGER_IN, "inbound.log");
    let ix = add_install(
        &mut fx.ts,
        fx.tmp.path(),
        &h,
        &[("/usr/bin/tool", b"bin".as_slice())],
    );
    stagehand::run(&fx.ts, fx.ts.element(ix).unwrap(), Goal::Install).unwrap();

    // arg1 = count of the trigger's owner, arg2 = count of the watched name
    let log = fs::read_to_string(fx.root.join("inbound.log")).unwrap();
    assert_eq!(log.trim(), "1:1");
}

#[test]
fn trigger_scripts_fire_once_per_index() {
    let mut fx = fixture();

    // two installed packages both provide the watched name
    fx.ts.db().add(&mut header("src", "1.0")).unwrap();
    fx.ts.db().add(&mut header("src", "2.0")).unwrap();

    // two entries watching "src", both pointing at the same script slot
    let mut h = header("target", "1.0");
    h.put_str_vec(Tag::TriggerNames, vec!["src".into(), "src".into()]);
    h.put_u32_vec(
        Tag::TriggerFlags,
        vec![
            SenseFlags::TRIGGER_IN.bits(),
            SenseFlags::TRIGGER_IN.bits(),
        ],
    );
    h.put_str_vec(Tag::TriggerVersions, vec![String::new(), String::new()]);
    h.put_u32_vec(Tag::TriggerIndexes, vec![1, 1]);
    h.put_str_vec(
        Tag::TriggerScripts,
        vec![String::new(), "echo fired >> dedup.log".into()],
    );
    h.put_str_vec(
        Tag::TriggerScriptProgs,
        vec![String::new(), String::new()],
    );

    let ix = add_install(
        &mut fx.ts,
        fx.tmp.path(),
        &h,
        &[("/usr/bin/target", b"bin".as_slice())],
    );
    stagehand::run(&fx.ts, fx.ts.element(ix).unwrap(), Goal::Install).unwrap();

    // the second source and the second entry are both deduped away
    let log = fs::read_to_string(fx.root.join("dedup.log")).unwrap();
    assert_eq!(log.lines().count(), 1);
}

#[test]
fn erase_fires_un_triggers_then_removes_the_row() {
    let mut fx = fixture();

    let mut watcher = header("watcher", "1.0");
    watch(&mut watcher, "app", SenseFlags::TRIGGER_UN, "un.log");
    fx.ts.db().add(&mut watcher).unwrap();

    let mut app = header("app", "1.0");
    let offset = fx.ts.db().add(&mut app).unwrap();

    let stored = fx.ts.db().get(offset).unwrap().unwrap();
    let ix = fx.ts.add_erase_element(stored);
    stagehand::run(&fx.ts, fx.ts.element(ix).unwrap(), Goal::Erase).unwrap();

    // fired while the departing package was still in the database, with
    // arg2 counting it down to zero
    let log = fs::read_to_string(fx.root.join("un.log")).unwrap();
    assert_eq!(log.trim(), "1:0");
    assert_eq!(fx.ts.db().count_packages("app").unwrap(), 0);
}

#[test]
fn version_gated_trigger_respects_the_range() {
    let mut fx = fixture();

    // watches app >= 2.0 arriving
    let mut watcher = header("watcher", "1.0");
    watch(
        &mut watcher,
        "app",
        SenseFlags::TRIGGER_IN | SenseFlags::GREATER | SenseFlags::EQUAL,
        "gated.log",
    );
    watcher.put_str_vec(Tag::TriggerVersions, vec!["2.0".into()]);
    fx.ts.db().add(&mut watcher).unwrap();

    // 1.0 stays below the gate
    let h = header("app", "1.0");
    let ix = add_install(
        &mut fx.ts,
        fx.tmp.path(),
        &h,
        &[("/usr/bin/app", b"v1".as_slice())],
    );
    stagehand::run(&fx.ts, fx.ts.element(ix).unwrap(), Goal::Install).unwrap();
    assert!(!fx.root.join("gated.log").exists());

    // 3.0 crosses it
    let h = header("app", "3.0");
    let ix = add_install(
        &mut fx.ts,
        fx.tmp.path(),
        &h,
        &[("/usr/bin/app", b"v3".as_slice())],
    );
    stagehand::run(&fx.ts, fx.ts.element(ix).unwrap(), Goal::Install).unwrap();
    assert!(fx.root.join("gated.log").exists());
}

#[test]
fn header_without_trigger_arrays_fires_nothing() {
    let mut fx = fixture();
    let h = header("plain", "1.0");
    let ix = add_install(
        &mut fx.ts,
        fx.tmp.path(),
        &h,
        &[("/usr/bin/plain", b"bin".as_slice())],
    );
    stagehand::run(&fx.ts, fx.ts.element(ix).unwrap(), Goal::Install).unwrap();
    assert_eq!(fx.ts.db().count_packages("plain").unwrap(), 1);
    assert!(fx.recorder.scripts(stagehand::CallbackKind::ScriptStart).is_empty());
}

#[test]
fn suppressed_triggers_do_not_fire() {
    let mut fx = fixture();
    fx.ts
        .set_flags(stagehand::TransactionFlags::NOTRIGGERIN | stagehand::TransactionFlags::NOTRIGGERPREIN);

    let mut watcher = header("watcher", "1.0");
    watch(&mut watcher, "app", SenseFlags::TRIGGER_IN, "suppressed.log");
    fx.ts.db().add(&mut watcher).unwrap();

    let h = header("app", "1.0");
    let ix = add_install(
        &mut fx.ts,
        fx.tmp.path(),
        &h,
        &[("/usr/bin/app", b"bin".as_slice())],
    );
    stagehand::run(&fx.ts, fx.ts.element(ix).unwrap(), Goal::Install).unwrap();

    assert!(!fx.root.join("suppressed.log").exists());
    assert_eq!(fx.ts.db().count_packages("app").unwrap(), 1);
}
