//! Integration tests for definitions, lookup, generators, and removal

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tether_core::testutil::{
    capturing_unit, name_set, symbol_flags, symbol_map, take_responsibility, SessionFixture,
    SimpleMaterializationUnit,
};
use tether_core::{
    no_dependencies, AbsoluteSymbolsUnit, AliasEntry, AliasMap, EvaluatedSymbol, Generator,
    ReexportsGenerator, ReexportsUnit, SearchEntry, SessionError, SessionResult, SymbolFlags,
    SymbolMap, SymbolNameSet, SymbolStage,
};

#[test]
fn basic_successful_lookup() {
    let fx = SessionFixture::new();
    let (unit, slot) = capturing_unit(symbol_flags([(fx.foo.clone(), fx.foo_sym.flags())]));
    fx.lib.define(unit).unwrap();

    let completed = Arc::new(AtomicBool::new(false));
    let observed = completed.clone();
    let foo = fx.foo.clone();
    fx.session.lookup(
        &[SearchEntry::new(fx.lib.clone())],
        name_set([fx.foo.clone()]),
        SymbolStage::Ready,
        move |result| {
            let map = result.expect("lookup failed");
            assert_eq!(map[&foo].address(), 0x1000);
            assert_eq!(map[&foo].flags(), SymbolFlags::EXPORTED);
            observed.store(true, Ordering::SeqCst);
        },
        no_dependencies,
    );
    assert!(
        !completed.load(Ordering::SeqCst),
        "completed before the unit ran"
    );

    let mut mr = take_responsibility(&slot);
    mr.notify_resolved(symbol_map([(fx.foo.clone(), fx.foo_sym)]));
    assert!(
        !completed.load(Ordering::SeqCst),
        "completed before emission"
    );

    mr.notify_emitted();
    assert!(completed.load(Ordering::SeqCst), "ready callback never ran");
}

#[test]
fn lookup_with_hidden_symbols() {
    let fx = SessionFixture::new();
    let hidden_bar = EvaluatedSymbol::new(0x2000, SymbolFlags::empty());
    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([
            (fx.foo.clone(), fx.foo_sym),
            (fx.bar.clone(), hidden_bar),
        ])))
        .unwrap();

    let other = fx.session.create_library("other").unwrap();
    other
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.bar.clone(),
            fx.qux_sym,
        )])))
        .unwrap();

    let result = fx
        .session
        .blocking_lookup(
            &[
                SearchEntry::new(fx.lib.clone()),
                SearchEntry::new(other.clone()),
            ],
            name_set([fx.foo.clone(), fx.bar.clone()]),
        )
        .unwrap();

    assert_eq!(result.len(), 2);
    assert_eq!(result[&fx.foo].address(), 0x1000);
    assert_eq!(
        result[&fx.bar].address(),
        0x4000,
        "hidden definition should lose to the exported one"
    );

    // A privileged search entry can still see the hidden definition.
    let sym = fx
        .session
        .blocking_lookup_one(
            &[SearchEntry::with_non_exported(fx.lib.clone())],
            fx.bar.clone(),
        )
        .unwrap();
    assert_eq!(sym.address(), 0x2000);
}

#[test]
fn lookup_flags_does_not_materialize() {
    let fx = SessionFixture::new();
    let weak_exported = SymbolFlags::EXPORTED | SymbolFlags::WEAK;

    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.foo.clone(),
            fx.foo_sym,
        )])))
        .unwrap();
    fx.lib
        .define(SimpleMaterializationUnit::new(
            symbol_flags([(fx.bar.clone(), weak_exported)]),
            |_| panic!("symbol materialized on flags lookup"),
        ))
        .unwrap();

    let flags = fx
        .lib
        .lookup_flags(&name_set([fx.foo.clone(), fx.bar.clone(), fx.baz.clone()]))
        .unwrap();

    assert_eq!(flags.len(), 2, "baz has no definition and must be omitted");
    assert_eq!(flags[&fx.foo], SymbolFlags::EXPORTED);
    assert_eq!(flags[&fx.bar], weak_exported);
}

struct MapGenerator {
    symbols: SymbolMap,
}

impl Generator for MapGenerator {
    fn try_generate(
        &self,
        library: &tether_core::DynamicLibrary,
        names: &SymbolNameSet,
    ) -> SessionResult<SymbolNameSet> {
        let mut defs = SymbolMap::new();
        let mut claimed = SymbolNameSet::new();
        for name in names {
            if let Some(symbol) = self.symbols.get(name) {
                defs.insert(name.clone(), *symbol);
                claimed.insert(name.clone());
            }
        }
        if !defs.is_empty() {
            library.define(AbsoluteSymbolsUnit::new(defs))?;
        }
        Ok(claimed)
    }
}

#[test]
fn generator_defines_during_lookup() {
    let fx = SessionFixture::new();
    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.foo.clone(),
            fx.foo_sym,
        )])))
        .unwrap();
    fx.lib.add_generator(MapGenerator {
        symbols: symbol_map([(fx.bar.clone(), fx.bar_sym)]),
    });

    let result = fx
        .session
        .blocking_lookup(
            &[SearchEntry::new(fx.lib.clone())],
            name_set([fx.foo.clone(), fx.bar.clone()]),
        )
        .unwrap();

    assert_eq!(result[&fx.bar].address(), 0x2000);
}

struct FailingGenerator;

impl Generator for FailingGenerator {
    fn try_generate(
        &self,
        _library: &tether_core::DynamicLibrary,
        _names: &SymbolNameSet,
    ) -> SessionResult<SymbolNameSet> {
        Err(SessionError::Generator("bad generator".to_string()))
    }
}

#[test]
fn generator_failure_propagates() {
    let fx = SessionFixture::new();
    fx.lib.add_generator(FailingGenerator);

    let err = fx.lib.lookup_flags(&name_set([fx.foo.clone()])).unwrap_err();
    assert!(matches!(err, SessionError::Generator(ref msg) if msg == "bad generator"));

    let err = fx
        .session
        .blocking_lookup(&[SearchEntry::new(fx.lib.clone())], name_set([fx.foo.clone()]))
        .unwrap_err();
    assert!(matches!(err, SessionError::Generator(ref msg) if msg == "bad generator"));
}

#[test]
fn lookup_of_unknown_symbols_fails() {
    let fx = SessionFixture::new();
    let err = fx
        .session
        .blocking_lookup(&[SearchEntry::new(fx.lib.clone())], name_set([fx.foo.clone()]))
        .unwrap_err();
    assert!(matches!(err, SessionError::SymbolsNotFound(_)));
}

#[test]
fn basic_aliases() {
    let fx = SessionFixture::new();
    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([
            (fx.foo.clone(), fx.foo_sym),
            (fx.bar.clone(), fx.bar_sym),
        ])))
        .unwrap();

    let aliases: AliasMap = [
        (
            fx.baz.clone(),
            AliasEntry::new(fx.foo.clone(), SymbolFlags::EXPORTED),
        ),
        (
            fx.qux.clone(),
            AliasEntry::new(fx.bar.clone(), SymbolFlags::EXPORTED | SymbolFlags::WEAK),
        ),
    ]
    .into_iter()
    .collect();
    fx.lib.define(ReexportsUnit::aliases(aliases)).unwrap();

    // A strong definition supersedes the weak alias for qux.
    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.qux.clone(),
            fx.qux_sym,
        )])))
        .unwrap();

    let result = fx
        .session
        .blocking_lookup(
            &[SearchEntry::new(fx.lib.clone())],
            name_set([fx.baz.clone(), fx.qux.clone()]),
        )
        .unwrap();

    assert_eq!(
        result[&fx.baz].address(),
        0x1000,
        "baz should alias foo's address"
    );
    assert_eq!(
        result[&fx.qux].address(),
        0x4000,
        "the qux alias should have been overridden"
    );
}

#[test]
fn chained_aliases() {
    let fx = SessionFixture::new();
    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.foo.clone(),
            fx.foo_sym,
        )])))
        .unwrap();

    let aliases: AliasMap = [
        (
            fx.baz.clone(),
            AliasEntry::new(fx.bar.clone(), fx.baz_sym.flags()),
        ),
        (
            fx.bar.clone(),
            AliasEntry::new(fx.foo.clone(), fx.bar_sym.flags()),
        ),
    ]
    .into_iter()
    .collect();
    fx.lib.define(ReexportsUnit::aliases(aliases)).unwrap();

    let result = fx
        .session
        .blocking_lookup(
            &[SearchEntry::new(fx.lib.clone())],
            name_set([fx.bar.clone(), fx.baz.clone()]),
        )
        .unwrap();

    assert_eq!(result[&fx.bar].address(), 0x1000);
    assert_eq!(result[&fx.baz].address(), 0x1000);
}

#[test]
fn basic_reexports() {
    let fx = SessionFixture::new();
    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.foo.clone(),
            fx.foo_sym,
        )])))
        .unwrap();

    let other = fx.session.create_library("other").unwrap();
    let aliases: AliasMap = [(
        fx.bar.clone(),
        AliasEntry::new(fx.foo.clone(), fx.bar_sym.flags()),
    )]
    .into_iter()
    .collect();
    other
        .define(ReexportsUnit::from_library(fx.lib.clone(), aliases))
        .unwrap();

    let sym = fx
        .session
        .blocking_lookup_one(&[SearchEntry::new(other)], fx.bar.clone())
        .unwrap();
    assert_eq!(sym.address(), 0x1000);
}

#[test]
fn reexports_do_not_materialize_unrequested() {
    let fx = SessionFixture::new();
    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.foo.clone(),
            fx.foo_sym,
        )])))
        .unwrap();

    let bar_materialized = Arc::new(AtomicBool::new(false));
    let observed = bar_materialized.clone();
    let bar = fx.bar.clone();
    let bar_sym = fx.bar_sym;
    fx.lib
        .define(SimpleMaterializationUnit::new(
            symbol_flags([(fx.bar.clone(), fx.bar_sym.flags())]),
            move |mut mr| {
                observed.store(true, Ordering::SeqCst);
                mr.notify_resolved(symbol_map([(bar, bar_sym)]));
                mr.notify_emitted();
            },
        ))
        .unwrap();

    let other = fx.session.create_library("other").unwrap();
    let aliases: AliasMap = [
        (
            fx.baz.clone(),
            AliasEntry::new(fx.foo.clone(), fx.baz_sym.flags()),
        ),
        (
            fx.qux.clone(),
            AliasEntry::new(fx.bar.clone(), fx.qux_sym.flags()),
        ),
    ]
    .into_iter()
    .collect();
    other
        .define(ReexportsUnit::from_library(fx.lib.clone(), aliases))
        .unwrap();

    let sym = fx
        .session
        .blocking_lookup_one(&[SearchEntry::new(other)], fx.baz.clone())
        .unwrap();
    assert_eq!(sym.address(), 0x1000);
    assert!(
        !bar_materialized.load(Ordering::SeqCst),
        "bar's unit should stay lazy"
    );
}

#[test]
fn reexports_generator() {
    let fx = SessionFixture::new();
    let other = fx.session.create_library("other").unwrap();
    other
        .define(AbsoluteSymbolsUnit::new(symbol_map([
            (fx.foo.clone(), fx.foo_sym),
            (fx.bar.clone(), fx.bar_sym),
        ])))
        .unwrap();

    let bar = fx.bar.clone();
    fx.lib
        .add_generator(ReexportsGenerator::new(other, false).with_filter(move |name| *name != bar));

    let flags = fx
        .lib
        .lookup_flags(&name_set([fx.foo.clone(), fx.bar.clone(), fx.baz.clone()]))
        .unwrap();
    assert_eq!(flags.len(), 1, "only foo passes the filter and exists");
    assert_eq!(flags[&fx.foo], fx.foo_sym.flags());

    let sym = fx
        .session
        .blocking_lookup_one(&[SearchEntry::new(fx.lib.clone())], fx.foo.clone())
        .unwrap();
    assert_eq!(sym.address(), 0x1000);
}

#[test]
fn reexports_generator_skips_hidden_source_symbols() {
    let fx = SessionFixture::new();
    let other = fx.session.create_library("other").unwrap();
    let hidden_foo = EvaluatedSymbol::new(0x1000, SymbolFlags::empty());
    other
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.foo.clone(),
            hidden_foo,
        )])))
        .unwrap();

    fx.lib.add_generator(ReexportsGenerator::new(other, false));

    // The source only defines foo non-exported, so the generator must
    // decline the claim outright rather than install a re-export it can
    // never materialize. The lookup then misses cleanly.
    let err = fx
        .session
        .blocking_lookup(
            &[SearchEntry::with_non_exported(fx.lib.clone())],
            name_set([fx.foo.clone()]),
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::SymbolsNotFound(_)));

    let flags = fx.lib.lookup_flags(&name_set([fx.foo.clone()])).unwrap();
    assert!(flags.is_empty(), "no re-export should have been installed");
}

#[test]
fn remove_semantics() {
    let fx = SessionFixture::new();

    // foo will be fully materialized by the lookup below.
    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.foo.clone(),
            fx.foo_sym,
        )])))
        .unwrap();

    // bar stays unmaterialized and must be discarded by the removal.
    let bar_discarded = Arc::new(AtomicBool::new(false));
    let bar_destroyed = Arc::new(AtomicBool::new(false));
    let discarded = bar_discarded.clone();
    let destroyed = bar_destroyed.clone();
    let bar = fx.bar.clone();
    fx.lib
        .define(
            SimpleMaterializationUnit::new(
                symbol_flags([(fx.bar.clone(), fx.bar_sym.flags())]),
                |_| panic!("unexpected materialization of \"bar\""),
            )
            .on_discard(move |_, name| {
                assert_eq!(*name, bar, "expected \"bar\" to be discarded");
                discarded.store(true, Ordering::SeqCst);
            })
            .on_destroy(move || destroyed.store(true, Ordering::SeqCst)),
        )
        .unwrap();

    // baz starts materializing and finishes before the final attempt.
    let (baz_unit, baz_slot) =
        capturing_unit(symbol_flags([(fx.baz.clone(), fx.baz_sym.flags())]));
    fx.lib.define(baz_unit).unwrap();

    let completed = Arc::new(AtomicBool::new(false));
    let observed = completed.clone();
    fx.session.lookup(
        &[SearchEntry::new(fx.lib.clone())],
        name_set([fx.foo.clone(), fx.baz.clone()]),
        SymbolStage::Ready,
        move |result| {
            result.unwrap();
            observed.store(true, Ordering::SeqCst);
        },
        no_dependencies,
    );

    // Attempt 1: an unknown name poisons the whole request.
    let err = fx
        .lib
        .remove(&name_set([
            fx.foo.clone(),
            fx.bar.clone(),
            fx.baz.clone(),
            fx.qux.clone(),
        ]))
        .unwrap_err();
    assert!(matches!(err, SessionError::SymbolsNotFound(_)));

    // Attempt 2: baz is still materializing.
    let err = fx
        .lib
        .remove(&name_set([fx.foo.clone(), fx.bar.clone(), fx.baz.clone()]))
        .unwrap_err();
    assert!(matches!(err, SessionError::SymbolsCouldNotBeRemoved(_)));

    let mut baz_mr = take_responsibility(&baz_slot);
    baz_mr.notify_resolved(symbol_map([(fx.baz.clone(), fx.baz_sym)]));
    baz_mr.notify_emitted();
    assert!(completed.load(Ordering::SeqCst), "query should be done now");

    // Attempt 3: everything is removable.
    fx.lib
        .remove(&name_set([fx.foo.clone(), fx.bar.clone(), fx.baz.clone()]))
        .unwrap();
    assert!(bar_discarded.load(Ordering::SeqCst));
    assert!(bar_destroyed.load(Ordering::SeqCst));
}

#[test]
fn drop_materializer_when_empty() {
    let fx = SessionFixture::new();
    let weak_exported = SymbolFlags::EXPORTED | SymbolFlags::WEAK;

    let destroyed = Arc::new(AtomicBool::new(false));
    let observed = destroyed.clone();
    let foo = fx.foo.clone();
    let bar = fx.bar.clone();
    fx.lib
        .define(
            SimpleMaterializationUnit::new(
                symbol_flags([(fx.foo.clone(), weak_exported), (fx.bar.clone(), weak_exported)]),
                |_| panic!("unexpected materialization"),
            )
            .on_discard(move |_, name| {
                assert!(*name == foo || *name == bar, "discard of unexpected symbol");
            })
            .on_destroy(move || observed.store(true, Ordering::SeqCst)),
        )
        .unwrap();

    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.foo.clone(),
            fx.foo_sym,
        )])))
        .unwrap();
    assert!(
        !destroyed.load(Ordering::SeqCst),
        "unit still owns bar and must survive"
    );

    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.bar.clone(),
            fx.bar_sym,
        )])))
        .unwrap();
    assert!(destroyed.load(Ordering::SeqCst), "unit should be destroyed");
}

#[test]
fn weak_symbol_discarded_before_materialization() {
    let fx = SessionFixture::new();
    let weak_exported = SymbolFlags::EXPORTED | SymbolFlags::WEAK;

    let foo_materialized = Arc::new(AtomicBool::new(false));
    let bar_discarded = Arc::new(AtomicBool::new(false));

    let materialized = foo_materialized.clone();
    let discarded = bar_discarded.clone();
    let seen_discard = bar_discarded.clone();
    let foo = fx.foo.clone();
    let foo_sym = fx.foo_sym;
    let bar = fx.bar.clone();
    fx.lib
        .define(
            SimpleMaterializationUnit::new(
                symbol_flags([
                    (fx.foo.clone(), SymbolFlags::EXPORTED),
                    (fx.bar.clone(), weak_exported),
                ]),
                move |mut mr| {
                    assert!(
                        seen_discard.load(Ordering::SeqCst),
                        "bar should be discarded before materialization"
                    );
                    mr.notify_resolved(symbol_map([(foo, foo_sym)]));
                    mr.notify_emitted();
                    materialized.store(true, Ordering::SeqCst);
                },
            )
            .on_discard(move |_, name| {
                assert_eq!(*name, bar);
                discarded.store(true, Ordering::SeqCst);
            }),
        )
        .unwrap();

    fx.lib
        .define(AbsoluteSymbolsUnit::new(symbol_map([(
            fx.bar.clone(),
            fx.bar_sym,
        )])))
        .unwrap();
    assert!(bar_discarded.load(Ordering::SeqCst));

    let sym = fx
        .session
        .blocking_lookup_one(&[SearchEntry::new(fx.lib.clone())], fx.foo.clone())
        .unwrap();
    assert_eq!(sym.address(), 0x1000);
    assert!(foo_materialized.load(Ordering::SeqCst));
}

#[test]
fn weak_duplicate_unit_is_discarded_and_destroyed() {
    let fx = SessionFixture::new();
    let weak_exported = SymbolFlags::EXPORTED | SymbolFlags::WEAK;

    let bar_materialized = Arc::new(AtomicBool::new(false));
    let materialized = bar_materialized.clone();
    let foo = fx.foo.clone();
    let bar = fx.bar.clone();
    let foo_sym = fx.foo_sym;
    let bar_sym = fx.bar_sym;
    fx.lib
        .define(SimpleMaterializationUnit::new(
            symbol_flags([
                (fx.foo.clone(), SymbolFlags::EXPORTED),
                (fx.bar.clone(), weak_exported),
            ]),
            move |mut mr| {
                mr.notify_resolved(symbol_map([(foo, foo_sym), (bar, bar_sym)]));
                mr.notify_emitted();
                materialized.store(true, Ordering::SeqCst);
            },
        ))
        .unwrap();

    let dup_discarded = Arc::new(AtomicBool::new(false));
    let dup_destroyed = Arc::new(AtomicBool::new(false));
    let discarded = dup_discarded.clone();
    let destroyed = dup_destroyed.clone();
    let bar = fx.bar.clone();
    fx.lib
        .define(
            SimpleMaterializationUnit::new(
                symbol_flags([(fx.bar.clone(), weak_exported)]),
                |_| panic!("attempt to materialize bar from the losing unit"),
            )
            .on_discard(move |_, name| {
                assert_eq!(*name, bar);
                discarded.store(true, Ordering::SeqCst);
            })
            .on_destroy(move || destroyed.store(true, Ordering::SeqCst)),
        )
        .unwrap();

    assert!(dup_discarded.load(Ordering::SeqCst));
    assert!(
        dup_destroyed.load(Ordering::SeqCst),
        "the losing unit owns nothing and must be destroyed"
    );

    let sym = fx
        .session
        .blocking_lookup_one(&[SearchEntry::new(fx.lib.clone())], fx.bar.clone())
        .unwrap();
    assert_eq!(sym.address(), 0x2000);
    assert!(bar_materialized.load(Ordering::SeqCst));
}

#[test]
fn materializing_weak_symbol_is_treated_as_strong() {
    let fx = SessionFixture::new();
    let weak_exported = SymbolFlags::EXPORTED | SymbolFlags::WEAK;

    let (unit, slot) = capturing_unit(symbol_flags([(fx.foo.clone(), weak_exported)]));
    fx.lib.define(unit).unwrap();

    fx.session.lookup(
        &[SearchEntry::new(fx.lib.clone())],
        name_set([fx.foo.clone()]),
        SymbolStage::Ready,
        |result| {
            result.unwrap();
        },
        no_dependencies,
    );

    let err = fx
        .lib
        .define(SimpleMaterializationUnit::new(
            symbol_flags([(fx.foo.clone(), SymbolFlags::EXPORTED)]),
            |_| panic!("this unit should never materialize"),
        ))
        .unwrap_err();
    assert!(matches!(err, SessionError::DuplicateDefinition(ref name) if *name == fx.foo));

    let mut mr = take_responsibility(&slot);
    mr.notify_resolved(symbol_map([(fx.foo.clone(), fx.foo_sym)]));
    mr.notify_emitted();
}

#[test]
fn define_materializing_mid_flight() {
    let fx = SessionFixture::new();

    let no_more = Arc::new(AtomicBool::new(false));
    let gate = no_more.clone();
    fx.session.set_dispatcher(move |task| {
        assert!(!gate.load(Ordering::SeqCst), "unexpected materialization");
        task.run();
    });

    let foo = fx.foo.clone();
    let bar = fx.bar.clone();
    let foo_sym = fx.foo_sym;
    let bar_sym = fx.bar_sym;
    fx.lib
        .define(SimpleMaterializationUnit::new(
            symbol_flags([(fx.foo.clone(), fx.foo_sym.flags())]),
            move |mut mr| {
                mr.define_materializing(symbol_flags([(bar.clone(), bar_sym.flags())]))
                    .unwrap();
                mr.notify_resolved(symbol_map([(foo, foo_sym), (bar, bar_sym)]));
                mr.notify_emitted();
            },
        ))
        .unwrap();

    let sym = fx
        .session
        .blocking_lookup_one(&[SearchEntry::new(fx.lib.clone())], fx.foo.clone())
        .unwrap();
    assert_eq!(sym.address(), 0x1000);

    // Everything is materialized; the bar lookup must not dispatch.
    no_more.store(true, Ordering::SeqCst);
    let sym = fx
        .session
        .blocking_lookup_one(&[SearchEntry::new(fx.lib.clone())], fx.bar.clone())
        .unwrap();
    assert_eq!(sym.address(), 0x2000);
}

#[test]
fn requested_symbols_and_replace() {
    let fx = SessionFixture::new();

    let foo_materialized = Arc::new(AtomicBool::new(false));
    let bar_materialized = Arc::new(AtomicBool::new(false));

    let foo_seen = foo_materialized.clone();
    let bar_seen = bar_materialized.clone();
    let foo = fx.foo.clone();
    let bar = fx.bar.clone();
    let foo_sym = fx.foo_sym;
    let bar_sym = fx.bar_sym;
    fx.lib
        .define(SimpleMaterializationUnit::new(
            symbol_flags([
                (fx.foo.clone(), fx.foo_sym.flags()),
                (fx.bar.clone(), fx.bar_sym.flags()),
            ]),
            move |mut mr| {
                let requested = mr.get_requested_symbols();
                assert_eq!(requested.len(), 1, "only foo has a pending query");
                assert!(requested.contains(&foo));

                let bar_for_unit = bar.clone();
                mr.replace(SimpleMaterializationUnit::new(
                    symbol_flags([(bar.clone(), bar_sym.flags())]),
                    move |mut mr2| {
                        mr2.notify_resolved(symbol_map([(bar_for_unit, bar_sym)]));
                        mr2.notify_emitted();
                        bar_seen.store(true, Ordering::SeqCst);
                    },
                ));
                assert_eq!(mr.symbols().len(), 1, "only foo is still owned");

                mr.notify_resolved(symbol_map([(foo, foo_sym)]));
                mr.notify_emitted();
                foo_seen.store(true, Ordering::SeqCst);
            },
        ))
        .unwrap();

    assert!(!foo_materialized.load(Ordering::SeqCst));
    assert!(!bar_materialized.load(Ordering::SeqCst));

    let sym = fx
        .session
        .blocking_lookup_one(&[SearchEntry::new(fx.lib.clone())], fx.foo.clone())
        .unwrap();
    assert_eq!(sym.address(), 0x1000);
    assert!(foo_materialized.load(Ordering::SeqCst));
    assert!(
        !bar_materialized.load(Ordering::SeqCst),
        "bar went back to the library and must stay lazy"
    );

    let sym = fx
        .session
        .blocking_lookup_one(&[SearchEntry::new(fx.lib.clone())], fx.bar.clone())
        .unwrap();
    assert_eq!(sym.address(), 0x2000);
    assert!(bar_materialized.load(Ordering::SeqCst));
}

#[test]
fn delegation_splits_a_responsibility() {
    let fx = SessionFixture::new();

    let foo = fx.foo.clone();
    let bar = fx.bar.clone();
    let foo_sym = fx.foo_sym;
    let bar_sym = fx.bar_sym;
    fx.lib
        .define(SimpleMaterializationUnit::new(
            symbol_flags([
                (fx.foo.clone(), fx.foo_sym.flags()),
                (fx.bar.clone(), fx.bar_sym.flags()),
            ]),
            move |mut mr| {
                let mut delegated = mr.delegate(&name_set([bar.clone()]));
                mr.notify_resolved(symbol_map([(foo, foo_sym)]));
                mr.notify_emitted();
                delegated.notify_resolved(symbol_map([(bar, bar_sym)]));
                delegated.notify_emitted();
            },
        ))
        .unwrap();

    let result = fx
        .session
        .blocking_lookup(
            &[SearchEntry::new(fx.lib.clone())],
            name_set([fx.foo.clone(), fx.bar.clone()]),
        )
        .unwrap();
    assert_eq!(result[&fx.foo].address(), 0x1000);
    assert_eq!(result[&fx.bar].address(), 0x2000);
}

#[test]
fn generator_side_effects_survive_failed_lookup() {
    let fx = SessionFixture::new();
    fx.lib.add_generator(MapGenerator {
        symbols: symbol_map([(fx.foo.clone(), fx.foo_sym)]),
    });

    // qux is nowhere to be found; the lookup fails but foo's definition,
    // installed by the generator along the way, sticks.
    let err = fx
        .session
        .blocking_lookup(
            &[SearchEntry::new(fx.lib.clone())],
            name_set([fx.foo.clone(), fx.qux.clone()]),
        )
        .unwrap_err();
    assert!(matches!(err, SessionError::SymbolsNotFound(_)));

    let flags = fx.lib.lookup_flags(&name_set([fx.foo.clone()])).unwrap();
    assert_eq!(flags.len(), 1);
}
