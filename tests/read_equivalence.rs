mod common;

use classfile_bridge::constants::*;
use classfile_bridge::ClassWriter;
use pretty_assertions::assert_eq;

use common::{
    model_events, visitor_events, write_module_info, write_record, write_sample, write_wide,
};
use common::{Fixture, FIXTURES};

fn class_bytes(fixture: Fixture, flags: u32) -> Vec<u8> {
    let mut cw = ClassWriter::new(flags);
    fixture(&mut cw, V17).unwrap();
    cw.to_bytes().unwrap()
}

fn sample_bytes() -> Vec<u8> {
    class_bytes(write_sample, COMPUTE_FRAMES)
}

#[test]
fn both_readers_report_the_same_calls() {
    for (name, fixture, write_flags) in FIXTURES {
        let bytes = class_bytes(fixture, write_flags);
        let read_flags =
            [0, SKIP_DEBUG, SKIP_FRAMES, EXPAND_FRAMES, SKIP_CODE, SKIP_DEBUG | EXPAND_FRAMES];
        for flags in read_flags {
            assert_eq!(
                visitor_events(&bytes, flags),
                model_events(&bytes, flags),
                "{name} flags {flags:#x}"
            );
        }
    }
}

#[test]
fn wide_fixtures_reach_the_rarer_calls() {
    let mut events = model_events(&class_bytes(write_wide, 0), 0);
    events.extend(model_events(&class_bytes(write_record, 0), 0));
    events.extend(model_events(&class_bytes(write_module_info, 0), 0));
    let expected = [
        "module demo.app 0x0 Some(\"1.0\")",
        "require java.logging 0x20 Some(\"17\")",
        "provide demo/app/Plugin [\"demo/app/internal/DefaultPlugin\"]",
        "component names Ljava/util/List; Some(\"Ljava/util/List<Ljava/lang/String;>;\")",
        "type_annotation 0x13000000 Some([(3, 0)]) Ldemo/Elem; true",
        "type_annotation 0x13000000 Some([(0, 0)]) Ldemo/Elem; false",
        "type_annotation 0x10000000 Some([(3, 0)]) Ldemo/Self; true",
        "nest_member demo/Wide$Right",
        "permitted_subclass demo/Wide$Left",
        "annotation_default",
        "parameter Some(\"key\") 0x10",
        "parameter_annotation 1",
        "type_annotation 0x16000000 Some([(3, 0)]) Ldemo/Elem; true",
        "try_catch_annotation 0x42000000 None Ldemo/Caught; false",
        "local_variable_annotation 0x40000000 Some([(3, 0)]) Ldemo/Elem; true",
        "frame same1 Object(\"java/lang/RuntimeException\")",
    ];
    for event in expected {
        assert!(events.iter().any(|logged| logged == event), "{event} missing from {events:#?}");
    }
    let prefixes = [
        "indy run()Ljava/lang/Runnable; ",
        "ldc Handle(Handle { tag: 2, ",
        "ldc Dynamic(ConstantDynamic { name: \"answer\", ",
        "lookupswitch ",
        "local items Ljava/util/List; Some(\"Ljava/util/List<Ljava/lang/String;>;\") [",
        "frame full [Integer] [Uninitialized(",
    ];
    for prefix in prefixes {
        assert!(
            events.iter().any(|logged| logged.starts_with(prefix)),
            "{prefix} missing from {events:#?}"
        );
    }
}

#[test]
fn sample_reads_back_in_protocol_order() {
    let events = model_events(&sample_bytes(), 0);
    let position = |event: &str| {
        events
            .iter()
            .position(|logged| logged == event)
            .unwrap_or_else(|| panic!("{event} missing from {events:#?}"))
    };

    assert_eq!(
        events[0],
        "class 61.0 0x21 demo/Sample None Some(\"java/lang/Object\") [\"java/lang/Runnable\"]"
    );
    assert_eq!(events[1], "source Some(\"Sample.java\") None");
    let custom = position("attribute demo.Custom Some([1, 2, 3])");
    assert!(position("annotation Ldemo/Marker; true") < custom);
    assert!(custom < position("field 0x19 LIMIT I None Some(Integer(42))"));
    assert_eq!(events.last().map(String::as_str), Some("class_end"));
}

#[test]
fn cast_annotation_follows_its_instruction() {
    let events = model_events(&sample_bytes(), 0);
    let cast = events
        .iter()
        .position(|event| event == "type 192 java/lang/String")
        .unwrap();
    assert!(events[cast + 1].starts_with("insn_annotation 0x47000000 None Ldemo/NonNull; true"));
    // The annotated instruction gets a label of its own.
    assert!(events[cast - 1].starts_with("label "));
    assert_eq!(events[cast - 2], "var 25 0");
}

#[test]
fn switch_targets_are_the_visited_labels() {
    let events = model_events(&sample_bytes(), SKIP_FRAMES);
    let switch = events.iter().find(|event| event.starts_with("tableswitch")).unwrap();
    // tableswitch 0 1 <default> [<zero> <one>]
    let targets: Vec<&str> = switch
        .trim_start_matches("tableswitch 0 1 ")
        .split(|c: char| c == ' ' || c == '[' || c == ']')
        .filter(|part| !part.is_empty())
        .collect();
    assert_eq!(targets.len(), 3);
    for target in targets {
        assert!(events.contains(&format!("label {target}")), "{target} never placed");
    }
}
