//! Classes, data types and structural features of a model.
//!
//! A [`Metamodel`] is immutable once built. It precomputes the transitive
//! supertype and subtype closures that the indexer uses to turn a concrete
//! class into every class it is an instance of.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use trellis_foundation::{Error, ErrorKind, Result, Value, ValueKind};

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a class in a [`Metamodel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClassId(pub u32);

/// Identifier of a data type in a [`Metamodel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DataTypeId(pub u32);

/// Identifier of a structural feature in a [`Metamodel`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureId(pub u32);

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "class#{}", self.0)
    }
}

impl fmt::Display for DataTypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "datatype#{}", self.0)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "feature#{}", self.0)
    }
}

// =============================================================================
// Schemas
// =============================================================================

/// A class with its direct supertypes.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ClassSchema {
    /// Identifier.
    pub id: ClassId,
    /// Unique name.
    pub name: String,
    /// Direct supertypes.
    pub supertypes: Vec<ClassId>,
    /// Abstract classes cannot be instantiated.
    pub is_abstract: bool,
}

/// A scalar data type.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DataTypeSchema {
    /// Identifier.
    pub id: DataTypeId,
    /// Unique name.
    pub name: String,
    /// Kind of the values of this type.
    pub kind: ValueKind,
}

/// Whether a feature holds scalars or object references.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum FeatureKind {
    /// Holds values of a data type.
    Attribute(DataTypeId),
    /// Holds references to instances of a class.
    Reference {
        /// Class of the referenced objects.
        target: ClassId,
        /// Referenced objects are contained by the holder.
        containment: bool,
    },
}

/// A structural feature declared on a class.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct FeatureSchema {
    /// Identifier.
    pub id: FeatureId,
    /// Name, unique within the host class hierarchy.
    pub name: String,
    /// Declaring class.
    pub host: ClassId,
    /// Attribute or reference.
    pub kind: FeatureKind,
    /// Multi-valued features hold a set of values.
    pub many: bool,
    /// Derived features are computed, not stored.
    pub derived: bool,
    /// Derived features that announce their own changes.
    pub well_behaving: bool,
    /// Opposite reference kept in sync by the model.
    pub opposite: Option<FeatureId>,
}

impl FeatureSchema {
    /// Returns true for references.
    #[must_use]
    pub fn is_reference(&self) -> bool {
        matches!(self.kind, FeatureKind::Reference { .. })
    }

    /// Data type of an attribute.
    #[must_use]
    pub fn data_type(&self) -> Option<DataTypeId> {
        match self.kind {
            FeatureKind::Attribute(dt) => Some(dt),
            FeatureKind::Reference { .. } => None,
        }
    }

    /// Target class of a reference.
    #[must_use]
    pub fn target_class(&self) -> Option<ClassId> {
        match self.kind {
            FeatureKind::Reference { target, .. } => Some(target),
            FeatureKind::Attribute(_) => None,
        }
    }
}

// =============================================================================
// Metamodel
// =============================================================================

/// Immutable set of classes, data types and features.
#[derive(Clone, Debug)]
pub struct Metamodel {
    classes: Vec<ClassSchema>,
    data_types: Vec<DataTypeSchema>,
    features: Vec<FeatureSchema>,
    class_names: HashMap<String, ClassId>,
    data_type_names: HashMap<String, DataTypeId>,
    supertypes: Vec<BTreeSet<ClassId>>,
    subtypes: Vec<BTreeSet<ClassId>>,
    features_of: Vec<Vec<FeatureId>>,
}

impl Metamodel {
    /// Starts building a metamodel.
    #[must_use]
    pub fn builder() -> MetamodelBuilder {
        MetamodelBuilder::default()
    }

    /// Looks up a class.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownClass`] for foreign ids.
    pub fn class(&self, id: ClassId) -> Result<&ClassSchema> {
        self.classes
            .get(id.0 as usize)
            .ok_or_else(|| Error::new(ErrorKind::UnknownClass(id.to_string())))
    }

    /// Looks up a class by name.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownClass`] if no class has this name.
    pub fn class_by_name(&self, name: &str) -> Result<ClassId> {
        self.class_names
            .get(name)
            .copied()
            .ok_or_else(|| Error::new(ErrorKind::UnknownClass(name.to_string())))
    }

    /// Looks up a data type.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownDataType`] for foreign ids.
    pub fn data_type(&self, id: DataTypeId) -> Result<&DataTypeSchema> {
        self.data_types
            .get(id.0 as usize)
            .ok_or_else(|| Error::new(ErrorKind::UnknownDataType(id.to_string())))
    }

    /// Looks up a data type by name.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownDataType`] if no data type has this name.
    pub fn data_type_by_name(&self, name: &str) -> Result<DataTypeId> {
        self.data_type_names
            .get(name)
            .copied()
            .ok_or_else(|| Error::new(ErrorKind::UnknownDataType(name.to_string())))
    }

    /// Looks up a feature.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownFeature`] for foreign ids.
    pub fn feature(&self, id: FeatureId) -> Result<&FeatureSchema> {
        self.features
            .get(id.0 as usize)
            .ok_or_else(|| Error::new(ErrorKind::UnknownFeature(id.to_string())))
    }

    /// Looks up a feature available on `class`, including inherited ones.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownFeature`] if the class has no such feature.
    pub fn feature_by_name(&self, class: ClassId, name: &str) -> Result<FeatureId> {
        self.features_of(class)?
            .iter()
            .copied()
            .find(|f| self.features[f.0 as usize].name == name)
            .ok_or_else(|| {
                Error::new(ErrorKind::UnknownFeature(format!(
                    "{}.{name}",
                    self.class_name(class)
                )))
            })
    }

    /// Features declared on `class` or any of its supertypes.
    ///
    /// # Errors
    ///
    /// Returns [`ErrorKind::UnknownClass`] for foreign ids.
    pub fn features_of(&self, class: ClassId) -> Result<&[FeatureId]> {
        self.features_of
            .get(class.0 as usize)
            .map(Vec::as_slice)
            .ok_or_else(|| Error::new(ErrorKind::UnknownClass(class.to_string())))
    }

    /// Strict transitive supertypes of `class`.
    #[must_use]
    pub fn all_supertypes(&self, class: ClassId) -> Option<&BTreeSet<ClassId>> {
        self.supertypes.get(class.0 as usize)
    }

    /// Strict transitive subtypes of `class`.
    #[must_use]
    pub fn all_subtypes(&self, class: ClassId) -> Option<&BTreeSet<ClassId>> {
        self.subtypes.get(class.0 as usize)
    }

    /// `class` itself followed by its strict transitive supertypes.
    pub fn type_closure(&self, class: ClassId) -> impl Iterator<Item = ClassId> + '_ {
        std::iter::once(class).chain(self.all_supertypes(class).into_iter().flatten().copied())
    }

    /// Reflexive subclass test.
    #[must_use]
    pub fn is_subclass_of(&self, sub: ClassId, sup: ClassId) -> bool {
        sub == sup
            || self
                .all_supertypes(sub)
                .is_some_and(|s| s.contains(&sup))
    }

    /// Returns true if `value` conforms to data type `dt`.
    #[must_use]
    pub fn accepts(&self, dt: DataTypeId, value: &Value) -> bool {
        self.data_type(dt).is_ok_and(|d| d.kind == value.kind())
    }

    /// Name of a class, or its id if unknown.
    #[must_use]
    pub fn class_name(&self, id: ClassId) -> String {
        self.class(id)
            .map_or_else(|_| id.to_string(), |c| c.name.clone())
    }

    /// Qualified `Class.feature` name of a feature, or its id if unknown.
    #[must_use]
    pub fn feature_name(&self, id: FeatureId) -> String {
        self.feature(id).map_or_else(
            |_| id.to_string(),
            |f| format!("{}.{}", self.class_name(f.host), f.name),
        )
    }

    /// Name of a data type, or its id if unknown.
    #[must_use]
    pub fn data_type_name(&self, id: DataTypeId) -> String {
        self.data_type(id)
            .map_or_else(|_| id.to_string(), |d| d.name.clone())
    }

    /// All classes.
    pub fn classes(&self) -> impl Iterator<Item = &ClassSchema> + '_ {
        self.classes.iter()
    }

    /// All data types.
    pub fn data_types(&self) -> impl Iterator<Item = &DataTypeSchema> + '_ {
        self.data_types.iter()
    }

    /// All features.
    pub fn features(&self) -> impl Iterator<Item = &FeatureSchema> + '_ {
        self.features.iter()
    }
}

// =============================================================================
// Builder
// =============================================================================

/// Incremental constructor of a [`Metamodel`].
///
/// Declarations hand out ids immediately; consistency is checked once in
/// [`MetamodelBuilder::build`].
#[derive(Debug, Default)]
pub struct MetamodelBuilder {
    classes: Vec<ClassSchema>,
    data_types: Vec<DataTypeSchema>,
    features: Vec<FeatureSchema>,
}

impl MetamodelBuilder {
    fn next_class_id(&self) -> ClassId {
        ClassId(u32::try_from(self.classes.len()).unwrap_or(u32::MAX))
    }

    fn next_feature_id(&self) -> FeatureId {
        FeatureId(u32::try_from(self.features.len()).unwrap_or(u32::MAX))
    }

    /// Declares a concrete class.
    pub fn class(&mut self, name: &str, supertypes: &[ClassId]) -> ClassId {
        let id = self.next_class_id();
        self.classes.push(ClassSchema {
            id,
            name: name.to_string(),
            supertypes: supertypes.to_vec(),
            is_abstract: false,
        });
        id
    }

    /// Declares an abstract class.
    pub fn abstract_class(&mut self, name: &str, supertypes: &[ClassId]) -> ClassId {
        let id = self.class(name, supertypes);
        if let Some(c) = self.classes.last_mut() {
            c.is_abstract = true;
        }
        id
    }

    /// Declares a data type.
    pub fn data_type(&mut self, name: &str, kind: ValueKind) -> DataTypeId {
        let id = DataTypeId(u32::try_from(self.data_types.len()).unwrap_or(u32::MAX));
        self.data_types.push(DataTypeSchema {
            id,
            name: name.to_string(),
            kind,
        });
        id
    }

    fn push_feature(&mut self, host: ClassId, name: &str, kind: FeatureKind, many: bool) -> FeatureId {
        let id = self.next_feature_id();
        self.features.push(FeatureSchema {
            id,
            name: name.to_string(),
            host,
            kind,
            many,
            derived: false,
            well_behaving: true,
            opposite: None,
        });
        id
    }

    /// Declares a stored attribute.
    pub fn attribute(&mut self, host: ClassId, name: &str, data_type: DataTypeId, many: bool) -> FeatureId {
        self.push_feature(host, name, FeatureKind::Attribute(data_type), many)
    }

    /// Declares a stored non-containment reference.
    pub fn reference(&mut self, host: ClassId, name: &str, target: ClassId, many: bool) -> FeatureId {
        self.push_feature(
            host,
            name,
            FeatureKind::Reference {
                target,
                containment: false,
            },
            many,
        )
    }

    /// Declares a stored containment reference.
    pub fn containment(&mut self, host: ClassId, name: &str, target: ClassId, many: bool) -> FeatureId {
        self.push_feature(
            host,
            name,
            FeatureKind::Reference {
                target,
                containment: true,
            },
            many,
        )
    }

    /// Declares a derived feature.
    ///
    /// `well_behaving` derived features announce their own changes; the others
    /// must be resampled by the indexer.
    pub fn derived(&mut self, host: ClassId, name: &str, kind: FeatureKind, many: bool, well_behaving: bool) -> FeatureId {
        let id = self.push_feature(host, name, kind, many);
        if let Some(f) = self.features.last_mut() {
            f.derived = true;
            f.well_behaving = well_behaving;
        }
        id
    }

    /// Makes two references opposites of each other.
    pub fn opposites(&mut self, a: FeatureId, b: FeatureId) {
        if let Some(f) = self.features.get_mut(a.0 as usize) {
            f.opposite = Some(b);
        }
        if let Some(f) = self.features.get_mut(b.0 as usize) {
            f.opposite = Some(a);
        }
    }

    /// Validates the declarations and computes the type closures.
    ///
    /// # Errors
    ///
    /// Returns an error on duplicate names, unknown ids, cyclic inheritance
    /// or inconsistent opposites.
    pub fn build(self) -> Result<Metamodel> {
        let mut class_names = HashMap::new();
        for c in &self.classes {
            if class_names.insert(c.name.clone(), c.id).is_some() {
                return Err(Error::internal(format!("duplicate class name {}", c.name)));
            }
            for s in &c.supertypes {
                if s.0 as usize >= self.classes.len() {
                    return Err(Error::new(ErrorKind::UnknownClass(s.to_string())));
                }
            }
        }
        let mut data_type_names = HashMap::new();
        for d in &self.data_types {
            if data_type_names.insert(d.name.clone(), d.id).is_some() {
                return Err(Error::internal(format!("duplicate data type name {}", d.name)));
            }
        }

        let supertypes = self.compute_supertypes()?;
        let mut subtypes = vec![BTreeSet::new(); self.classes.len()];
        for (sub, sups) in supertypes.iter().enumerate() {
            for sup in sups {
                subtypes[sup.0 as usize].insert(ClassId(u32::try_from(sub).unwrap_or(u32::MAX)));
            }
        }

        self.validate_features()?;

        let mut features_of = vec![Vec::new(); self.classes.len()];
        for (class, sups) in supertypes.iter().enumerate() {
            for f in &self.features {
                if f.host.0 as usize == class || sups.contains(&f.host) {
                    features_of[class].push(f.id);
                }
            }
        }

        Ok(Metamodel {
            classes: self.classes,
            data_types: self.data_types,
            features: self.features,
            class_names,
            data_type_names,
            supertypes,
            subtypes,
            features_of,
        })
    }

    fn compute_supertypes(&self) -> Result<Vec<BTreeSet<ClassId>>> {
        let mut closure = Vec::with_capacity(self.classes.len());
        for c in &self.classes {
            let mut seen = BTreeSet::new();
            let mut stack: Vec<ClassId> = c.supertypes.clone();
            while let Some(s) = stack.pop() {
                if s == c.id {
                    return Err(Error::internal(format!(
                        "cyclic inheritance through class {}",
                        c.name
                    )));
                }
                if seen.insert(s) {
                    stack.extend(self.classes[s.0 as usize].supertypes.iter().copied());
                }
            }
            closure.push(seen);
        }
        Ok(closure)
    }

    fn validate_features(&self) -> Result<()> {
        for f in &self.features {
            if f.host.0 as usize >= self.classes.len() {
                return Err(Error::new(ErrorKind::UnknownClass(f.host.to_string())));
            }
            match f.kind {
                FeatureKind::Attribute(dt) if dt.0 as usize >= self.data_types.len() => {
                    return Err(Error::new(ErrorKind::UnknownDataType(dt.to_string())));
                }
                FeatureKind::Reference { target, .. } if target.0 as usize >= self.classes.len() => {
                    return Err(Error::new(ErrorKind::UnknownClass(target.to_string())));
                }
                _ => {}
            }
            if let Some(opp) = f.opposite {
                let Some(o) = self.features.get(opp.0 as usize) else {
                    return Err(Error::new(ErrorKind::UnknownFeature(opp.to_string())));
                };
                let consistent = o.opposite == Some(f.id)
                    && f.target_class() == Some(o.host)
                    && o.target_class() == Some(f.host);
                if !consistent {
                    return Err(Error::internal(format!(
                        "features {} and {} are not valid opposites",
                        f.name, o.name
                    )));
                }
            }
        }
        Ok(())
    }
}
