//! Catalog / Scope / Registry (C4): interns declarations into typed
//! entity identifiers and resolves symbols across nested scopes, including
//! serial-name resolution across `scope\subscope\name` paths.
//!
//! Grounded in the reference compiler's `catalog.h`/`catalog.cpp`: a
//! `Decl_Scope` per module/library/data-set/root, each holding
//! `visible_entities`, `serialized_entities`, `identifiers`, `by_decl` and
//! `all_ids`, plus a dense, append-only registry per `Reg_Type`. The C++
//! uses raw `Decl_AST *` pointers as `by_decl` keys; we use the stable
//! `decl_id` numbering assigned by [`assign_decl_ids`] instead (see the
//! spec's design note on substituting a stable AST handle for a pointer).

use std::collections::{HashMap, HashSet};

use mobius_ast::{ArgumentAst, DeclAst, DeclType, FileAst, SourceLocation, TokenKind};

use crate::diagnostics::{Diagnostic, DiagResult, ErrorKind};

// ============================================================================
// Entity identity
// ============================================================================

/// The small set of entity kinds a declaration can register as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegType {
    IndexSet,
    Parameter,
    ParameterGroup,
    Module,
    Library,
    Connection,
    Component,
    Series,
    Solver,
    Unit,
    Function,
    Constant,
    Loc,
    StateVar,
}

impl RegType {
    const ALL: [RegType; 14] = [
        RegType::IndexSet,
        RegType::Parameter,
        RegType::ParameterGroup,
        RegType::Module,
        RegType::Library,
        RegType::Connection,
        RegType::Component,
        RegType::Series,
        RegType::Solver,
        RegType::Unit,
        RegType::Function,
        RegType::Constant,
        RegType::Loc,
        RegType::StateVar,
    ];

    fn slot(self) -> usize {
        Self::ALL.iter().position(|t| *t == self).expect("RegType::ALL is exhaustive")
    }
}

/// `(reg_type, index)`. Invalid iff `index < 0`. Equality/hashing are
/// structural, matching the spec verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityId {
    pub reg_type: RegType,
    pub index: i32,
}

impl EntityId {
    pub const INVALID: EntityId = EntityId { reg_type: RegType::Constant, index: -1 };

    #[must_use]
    pub fn is_valid(self) -> bool {
        self.index >= 0
    }

    fn new(reg_type: RegType, index: usize) -> Self {
        EntityId { reg_type, index: index as i32 }
    }
}

/// A scope identifier: index into `Catalog::scopes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(pub u32);

// ============================================================================
// Registration records
// ============================================================================

/// Base fields every registration carries, plus kind-specific data.
#[derive(Debug, Clone)]
pub struct EntityRecord {
    pub id: EntityId,
    pub decl_id: u32,
    pub decl_type: DeclType,
    pub source_loc: SourceLocation,
    pub scope_id: ScopeId,
    pub name: String,
    pub has_been_processed: bool,
    pub data: EntityData,
}

/// Type-specific extensions to the base registration record. Only the
/// kinds the rest of the pipeline (C5 index data, C7 IR build) actually
/// consume carry extra fields; the others are `Generic` placeholders, a
/// scope can still register and resolve them by identifier/serial name.
#[derive(Debug, Clone, Default)]
pub enum EntityData {
    #[default]
    Generic,
    IndexSet(IndexSetDecl),
    StateVar(StateVarDecl),
    Connection(ConnectionDecl),
}

#[derive(Debug, Clone, Default)]
pub struct IndexSetDecl {
    pub sub_indexed_to: Option<EntityId>,
    pub union_of: Vec<EntityId>,
    pub is_edge_of_connection: Option<EntityId>,
}

#[derive(Debug, Clone)]
pub struct StateVarDecl {
    pub is_ode: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ConnectionDecl {
    pub edge_index_set: Option<EntityId>,
}

// ============================================================================
// Scope
// ============================================================================

#[derive(Debug, Clone)]
pub struct ScopeEntityEntry {
    pub id: EntityId,
    pub source_loc: SourceLocation,
    pub external: bool,
    pub was_referenced: bool,
    pub is_load_arg: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct SerialEntityEntry {
    pub id: EntityId,
    pub source_loc: SourceLocation,
}

/// A named lookup table of entities, owned by a module, library, data-set
/// top level, or the global root.
#[derive(Debug, Default)]
pub struct Scope {
    pub parent_id: Option<EntityId>,
    pub visible_entities: HashMap<String, ScopeEntityEntry>,
    pub serialized_entities: HashMap<(RegType, String), SerialEntityEntry>,
    pub identifiers: HashMap<EntityId, String>,
    pub by_decl: HashMap<u32, EntityId>,
    pub all_ids: HashSet<EntityId>,
}

impl Scope {
    #[must_use]
    pub fn new(parent_id: Option<EntityId>) -> Self {
        Scope { parent_id, ..Scope::default() }
    }

    /// Inserts `identifier -> id` into `visible_entities`/`identifiers`,
    /// adding to `all_ids` when locally declared. Fails on a reserved word
    /// or a duplicate identifier (citing the prior location).
    pub fn add_local(
        &mut self,
        identifier: &str,
        loc: SourceLocation,
        id: EntityId,
        is_locally_declared: bool,
    ) -> DiagResult<()> {
        if is_reserved_word(identifier) {
            return Err(Diagnostic::new(
                ErrorKind::ModelBuilding,
                loc,
                format!("'{identifier}' is a reserved word and cannot be used as an identifier"),
            ));
        }
        if !identifier.is_empty() {
            if let Some(existing) = self.visible_entities.get(identifier) {
                return Err(Diagnostic::duplicate(
                    ErrorKind::ModelBuilding,
                    loc,
                    existing.source_loc,
                    format!("duplicate identifier '{identifier}' in this scope"),
                ));
            }
            self.visible_entities.insert(
                identifier.to_string(),
                ScopeEntityEntry {
                    id,
                    source_loc: loc,
                    external: !is_locally_declared,
                    was_referenced: false,
                    is_load_arg: false,
                },
            );
            self.identifiers.insert(id, identifier.to_string());
        }
        if is_locally_declared {
            self.all_ids.insert(id);
        }
        Ok(())
    }

    /// Registers a declaration using its own identifier, and records
    /// `by_decl[decl.decl_id] = id` so a deferred pass re-entering the same
    /// AST node resolves to the same id.
    pub fn register_decl(&mut self, decl: &DeclAst, id: EntityId) -> DiagResult<()> {
        let name = decl.name.clone().unwrap_or_default();
        self.add_local(&name, decl.source_loc, id, true)?;
        self.by_decl.insert(decl.decl_id, id);
        Ok(())
    }

    /// Inserts a user-facing serial (quoted) name, unique per scope per
    /// register type.
    pub fn set_serial_name(&mut self, serial_name: &str, loc: SourceLocation, id: EntityId) -> DiagResult<()> {
        let key = (id.reg_type, serial_name.to_string());
        if let Some(existing) = self.serialized_entities.get(&key) {
            return Err(Diagnostic::duplicate(
                ErrorKind::ModelBuilding,
                loc,
                existing.source_loc,
                format!("duplicate serial name \"{serial_name}\""),
            ));
        }
        self.serialized_entities.insert(key, SerialEntityEntry { id, source_loc: loc });
        Ok(())
    }

    /// Copies only `other`'s locally-declared entries into `self`, marking
    /// them external; refuses to overwrite an existing identifier.
    pub fn import(&mut self, other: &Scope, import_loc: SourceLocation) -> DiagResult<()> {
        for id in &other.all_ids {
            let Some(identifier) = other.identifiers.get(id) else { continue };
            if identifier.is_empty() {
                continue;
            }
            if let Some(existing) = self.visible_entities.get(identifier) {
                return Err(Diagnostic::duplicate(
                    ErrorKind::ModelBuilding,
                    import_loc,
                    existing.source_loc,
                    format!("import of '{identifier}' conflicts with an existing identifier"),
                ));
            }
            self.visible_entities.insert(
                identifier.clone(),
                ScopeEntityEntry {
                    id: *id,
                    source_loc: import_loc,
                    external: true,
                    was_referenced: false,
                    is_load_arg: false,
                },
            );
            self.identifiers.insert(*id, identifier.clone());
        }
        Ok(())
    }

    /// Looks up a visible identifier, marking it referenced.
    pub fn lookup(&mut self, identifier: &str) -> Option<EntityId> {
        let entry = self.visible_entities.get_mut(identifier)?;
        entry.was_referenced = true;
        Some(entry.id)
    }

    #[must_use]
    pub fn identifier_of(&self, id: EntityId) -> Option<&str> {
        self.identifiers.get(&id).map(String::as_str)
    }

    /// An identifier lookup with a type check; fails with *undeclared* or
    /// *type-mismatch*.
    pub fn expect(&mut self, expected_type: RegType, name: &str, loc: SourceLocation) -> DiagResult<EntityId> {
        let Some(id) = self.lookup(name) else {
            return Err(Diagnostic::new(
                ErrorKind::ModelBuilding,
                loc,
                format!("undeclared identifier '{name}'"),
            ));
        };
        if id.reg_type != expected_type {
            return Err(Diagnostic::new(
                ErrorKind::ModelBuilding,
                loc,
                format!(
                    "type mismatch: '{name}' is a {:?}, expected a {expected_type:?}",
                    id.reg_type
                ),
            ));
        }
        Ok(id)
    }

    /// Resolves an argument that should name an already-registered entity:
    /// a length-1 identifier chain looked up by name and type-checked
    /// against `expected_type` (when not `None`).
    pub fn resolve_argument(&mut self, expected_type: Option<RegType>, arg: &ArgumentAst) -> DiagResult<EntityId> {
        if arg.chain.len() != 1 {
            return Err(Diagnostic::new(
                ErrorKind::ModelBuilding,
                arg.source_loc,
                "expected a single identifier, not a qualified chain, in this position",
            ));
        }
        let name = &arg.chain[0];
        match expected_type {
            Some(t) => self.expect(t, name, arg.source_loc),
            None => self
                .lookup(name)
                .ok_or_else(|| Diagnostic::new(ErrorKind::ModelBuilding, arg.source_loc, format!("undeclared identifier '{name}'"))),
        }
    }

    /// A lazily-filtered iterator over `all_ids` matching one `reg_type`.
    pub fn by_type(&self, reg_type: RegType) -> impl Iterator<Item = EntityId> + '_ {
        self.all_ids.iter().copied().filter(move |id| id.reg_type == reg_type)
    }
}

fn is_reserved_word(identifier: &str) -> bool {
    DeclType::parse(identifier).is_some()
        || matches!(
            identifier,
            "par_real" | "par_int" | "par_bool" | "par_datetime" | "par_enum" | "directed_graph" | "version" | "out" | "true" | "false"
        )
}

// ============================================================================
// Catalog
// ============================================================================

/// The whole compilation's typed registries and scope tree. Immutable
/// after compilation; only numeric payloads mutate at run time.
#[derive(Debug, Default)]
pub struct Catalog {
    registries: [Vec<EntityRecord>; 14],
    pub scopes: Vec<Scope>,
    pub root_scope: ScopeId,
}

impl Catalog {
    #[must_use]
    pub fn new() -> Self {
        let mut catalog = Catalog { registries: Default::default(), scopes: Vec::new(), root_scope: ScopeId(0) };
        catalog.scopes.push(Scope::new(None));
        catalog
    }

    pub fn new_scope(&mut self, parent_id: Option<EntityId>) -> ScopeId {
        let id = ScopeId(self.scopes.len() as u32);
        self.scopes.push(Scope::new(parent_id));
        id
    }

    pub fn scope(&self, id: ScopeId) -> &Scope {
        &self.scopes[id.0 as usize]
    }

    pub fn scope_mut(&mut self, id: ScopeId) -> &mut Scope {
        &mut self.scopes[id.0 as usize]
    }

    /// Appends a new registration record, returning its freshly minted id.
    /// Append-only: ids never move, and there is no delete during a build.
    pub fn insert(&mut self, reg_type: RegType, decl_id: u32, decl_type: DeclType, source_loc: SourceLocation, scope_id: ScopeId, name: String) -> EntityId {
        let slot = &mut self.registries[reg_type.slot()];
        let id = EntityId::new(reg_type, slot.len());
        slot.push(EntityRecord {
            id,
            decl_id,
            decl_type,
            source_loc,
            scope_id,
            name,
            has_been_processed: false,
            data: EntityData::default(),
        });
        id
    }

    pub fn record(&self, id: EntityId) -> &EntityRecord {
        &self.registries[id.reg_type.slot()][id.index as usize]
    }

    pub fn record_mut(&mut self, id: EntityId) -> &mut EntityRecord {
        &mut self.registries[id.reg_type.slot()][id.index as usize]
    }

    pub fn all_of(&self, reg_type: RegType) -> impl Iterator<Item = EntityId> + '_ {
        (0..self.registries[reg_type.slot()].len()).map(move |i| EntityId::new(reg_type, i))
    }

    /// Builds `"superscope\scope\name"` from up to two ancestor scopes'
    /// `name` field, following `scope_id` up the chain.
    #[must_use]
    pub fn serialize(&self, id: EntityId) -> String {
        let record = self.record(id);
        let mut parts = vec![record.name.clone()];
        let mut scope_id = record.scope_id;
        for _ in 0..2 {
            let scope = self.scope(scope_id);
            let Some(parent_entity) = scope.parent_id else { break };
            if !parent_entity.is_valid() {
                break;
            }
            let parent_record = self.record(parent_entity);
            parts.push(parent_record.name.clone());
            scope_id = parent_record.scope_id;
        }
        parts.reverse();
        parts.join("\\")
    }

    /// Splits `path` on backslash and descends scope by scope via each
    /// scope's `serialized_entities`; returns `invalid` if any step fails
    /// or the final `reg_type` disagrees.
    #[must_use]
    pub fn deserialize(&self, path: &str, expected_type: RegType) -> EntityId {
        let segments: Vec<&str> = path.split('\\').collect();
        if segments.is_empty() {
            return EntityId::INVALID;
        }
        let mut scope_id = self.root_scope;
        for (i, seg) in segments.iter().enumerate() {
            let is_last = i + 1 == segments.len();
            let scope = self.scope(scope_id);
            let reg_type_guess = if is_last {
                expected_type
            } else {
                // Intermediate path segments name modules; search every
                // type the scope's serialized_entities could hold for one
                // whose name matches (module/library are the only kinds
                // that own nested scopes in practice).
                match RegType::ALL.iter().find(|t| scope.serialized_entities.contains_key(&(**t, (*seg).to_string()))) {
                    Some(t) => *t,
                    None => return EntityId::INVALID,
                }
            };
            let Some(entry) = scope.serialized_entities.get(&(reg_type_guess, (*seg).to_string())) else {
                return EntityId::INVALID;
            };
            let id = entry.id;
            if is_last {
                if id.reg_type != expected_type {
                    return EntityId::INVALID;
                }
                return id;
            }
            scope_id = self.record(id).scope_id;
        }
        EntityId::INVALID
    }

    /// Visits `decl`, then recurses into each body declaration, except
    /// inside function-body declarations (those share syntax with decls
    /// but aren't entities). Disallowed decl types are fatal.
    pub fn register_decls_recursive(
        &mut self,
        scope_id: ScopeId,
        decl: &DeclAst,
        allowed: &[DeclType],
        reg_type_of: impl Fn(DeclType) -> Option<RegType> + Copy,
    ) -> DiagResult<()> {
        if !allowed.contains(&decl.decl_type) {
            return Err(Diagnostic::new(
                ErrorKind::ModelBuilding,
                decl.source_loc,
                format!("a '{}' declaration is not allowed in this context", decl.decl_type.keyword()),
            ));
        }
        if let Some(reg_type) = reg_type_of(decl.decl_type) {
            let name = decl.name.clone().unwrap_or_default();
            let id = self.insert(reg_type, decl.decl_id, decl.decl_type, decl.source_loc, scope_id, name);
            self.scope_mut(scope_id).register_decl(decl, id)?;
        }
        if decl.decl_type == DeclType::Function {
            return Ok(());
        }
        for child in &decl.body {
            self.register_decls_recursive(scope_id, child, allowed, reg_type_of)?;
        }
        Ok(())
    }
}

/// Assigns a stable `decl_id` to every declaration in `file`, depth-first,
/// so the catalog's `by_decl` map has something pointer-stable to key on
/// (see the spec's design note: "substitute with a stable AST handle").
pub fn assign_decl_ids(file: &mut FileAst) {
    let mut next = 0u32;
    fn walk(decl: &mut DeclAst, next: &mut u32) {
        decl.decl_id = *next;
        *next += 1;
        for child in &mut decl.body {
            walk(child, next);
        }
    }
    for decl in &mut file.decls {
        walk(decl, &mut next);
    }
}

/// The token text of an argument, used when resolving `expected_type ==
/// None` arguments that are plain identifiers rather than decl references.
#[must_use]
pub fn arg_identifier(arg: &ArgumentAst) -> Option<&str> {
    match &arg.token.kind {
        TokenKind::Identifier(s) => Some(s),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mobius_ast::builders::DeclBuilder;

    fn loc() -> SourceLocation {
        SourceLocation::Internal
    }

    fn reg_type_of(t: DeclType) -> Option<RegType> {
        match t {
            DeclType::Module => Some(RegType::Module),
            DeclType::Par => Some(RegType::Parameter),
            DeclType::Quantity | DeclType::Property => Some(RegType::StateVar),
            _ => None,
        }
    }

    #[test]
    fn scope_serialization_round_trip() {
        let mut catalog = Catalog::new();
        let top = catalog.root_scope;
        let m_id = catalog.insert(RegType::Module, 1, DeclType::Module, loc(), top, "M".into());
        catalog.scope_mut(top).add_local("M", loc(), m_id, true).unwrap();

        let s_scope = catalog.new_scope(Some(m_id));
        let s_id = catalog.insert(RegType::Module, 2, DeclType::Module, loc(), s_scope, "S".into());
        // S itself is registered in M's scope (it's a submodule of M).
        catalog.scope_mut(top).add_local("S", loc(), s_id, true).unwrap();
        catalog.record_mut(s_id).scope_id = top; // S's own entity lives in M's naming scope

        let p_scope = catalog.new_scope(Some(s_id));
        let p_id = catalog.insert(RegType::Parameter, 3, DeclType::Par, loc(), p_scope, "P".into());
        catalog.record_mut(p_id).scope_id = s_scope; // P lives inside S's scope, one level down

        assert_eq!(catalog.serialize(p_id), "M\\S\\P");
    }

    #[test]
    fn deserialize_unknown_leaf_is_invalid() {
        let mut catalog = Catalog::new();
        let top = catalog.root_scope;
        let p_id = catalog.insert(RegType::Parameter, 1, DeclType::Par, loc(), top, "P".into());
        catalog.scope_mut(top).set_serial_name("P", loc(), p_id).unwrap();

        assert_eq!(catalog.deserialize("P", RegType::Parameter), p_id);
        assert_eq!(catalog.deserialize("Q", RegType::Parameter), EntityId::INVALID);
    }

    #[test]
    fn duplicate_identifier_is_fatal_with_both_locations() {
        let mut catalog = Catalog::new();
        let top = catalog.root_scope;
        let loc1 = SourceLocation::File { file_id: 0, line: 1, column: 1 };
        let loc2 = SourceLocation::File { file_id: 0, line: 5, column: 1 };
        let id1 = catalog.insert(RegType::Parameter, 1, DeclType::Par, loc1, top, "P".into());
        catalog.scope_mut(top).add_local("P", loc1, id1, true).unwrap();

        let id2 = catalog.insert(RegType::Parameter, 2, DeclType::Par, loc2, top, "P".into());
        let err = catalog.scope_mut(top).add_local("P", loc2, id2, true).unwrap_err();
        assert_eq!(err.prior_loc, Some(loc1));
    }

    #[test]
    fn reserved_word_identifier_is_fatal() {
        let mut catalog = Catalog::new();
        let top = catalog.root_scope;
        let id = catalog.insert(RegType::Module, 1, DeclType::Module, loc(), top, "module".into());
        let err = catalog.scope_mut(top).add_local("module", loc(), id, true).unwrap_err();
        assert_eq!(err.kind, ErrorKind::ModelBuilding);
    }

    #[test]
    fn import_marks_entries_external_and_refuses_conflicts() {
        let mut catalog = Catalog::new();
        let top = catalog.root_scope;
        let lib_scope = catalog.new_scope(None);
        let x_id = catalog.insert(RegType::Constant, 1, DeclType::Constant, loc(), lib_scope, "X".into());
        catalog.scope_mut(lib_scope).add_local("X", loc(), x_id, true).unwrap();

        {
            let (lib, dst) = {
                let scopes = &mut catalog.scopes;
                let (a, b) = scopes.split_at_mut(1.max(lib_scope.0 as usize));
                if lib_scope.0 == 0 {
                    (&b[0], &mut a[top.0 as usize])
                } else {
                    (&a[lib_scope.0 as usize], &mut b[0])
                }
            };
            dst.import(lib, loc()).unwrap();
        }
        let entry = catalog.scope(top).visible_entities.get("X").unwrap();
        assert!(entry.external);

        // Re-importing the same name into a scope that already declares it locally is a conflict.
        let y_id = catalog.insert(RegType::Constant, 2, DeclType::Constant, loc(), top, "X".into());
        let err = catalog.scope_mut(top).add_local("X", loc(), y_id, true);
        assert!(err.is_err());
    }

    #[test]
    fn recursive_registration_skips_function_bodies() {
        let mut catalog = Catalog::new();
        let top = catalog.root_scope;

        let inner_par = DeclBuilder::new(DeclType::Par, loc()).name("ShouldNotRegister").build();
        let func = DeclBuilder::new(DeclType::Function, loc())
            .name("F")
            .body(inner_par)
            .build();
        let outer_par = DeclBuilder::new(DeclType::Par, loc()).name("P").build();
        let mut module = DeclBuilder::new(DeclType::Module, loc())
            .name("M")
            .body(func)
            .body(outer_par)
            .build();
        module.decl_id = 0;
        module.body[0].decl_id = 1;
        module.body[0].body.iter_mut().enumerate().for_each(|(i, d)| d.decl_id = 2 + i as u32);
        module.body[1].decl_id = 10;

        catalog
            .register_decls_recursive(
                top,
                &module,
                &[DeclType::Module, DeclType::Function, DeclType::Par],
                reg_type_of,
            )
            .unwrap();

        assert!(catalog.scope(top).visible_entities.contains_key("P"));
        assert!(catalog.scope(top).visible_entities.contains_key("F"));
        assert!(!catalog.scope(top).visible_entities.contains_key("ShouldNotRegister"));
    }

    #[test]
    fn by_type_filters_to_one_register_type() {
        let mut catalog = Catalog::new();
        let top = catalog.root_scope;
        let a = catalog.insert(RegType::Parameter, 1, DeclType::Par, loc(), top, "A".into());
        let b = catalog.insert(RegType::Module, 2, DeclType::Module, loc(), top, "B".into());
        catalog.scope_mut(top).all_ids.insert(a);
        catalog.scope_mut(top).all_ids.insert(b);

        let params: Vec<_> = catalog.scope(top).by_type(RegType::Parameter).collect();
        assert_eq!(params, vec![a]);
    }

    #[test]
    fn decl_ids_assigned_depth_first() {
        let quantity = DeclBuilder::new(DeclType::Quantity, loc()).name("Water").build();
        let compartment = DeclBuilder::new(DeclType::Compartment, loc())
            .name("Soil")
            .body(quantity)
            .build();
        let mut file = mobius_ast::FileAst { doc_string: None, decls: vec![compartment] };
        assign_decl_ids(&mut file);
        assert_eq!(file.decls[0].decl_id, 0);
        assert_eq!(file.decls[0].body[0].decl_id, 1);
    }
}
