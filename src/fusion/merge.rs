//! Field-wise merge of records with explicit accessors.

use super::resolutions::corresponding;
use super::{finalize, AnnotatedValue, ConflictResolution, FusionContext, ResolutionTag};
use crate::error::DedupeError;
use hashbrown::HashMap;
use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

type Getter<R, F> = Arc<dyn Fn(&R) -> Option<F> + Send + Sync>;
type Setter<R, F> = Arc<dyn Fn(&mut R, F) + Send + Sync>;

/// Read and write access to one attribute of a record.
///
/// The getter returns `None` for absent values; absent values never take
/// part in a resolution.
pub struct FieldAccessor<R, F> {
    name: String,
    getter: Getter<R, F>,
    setter: Setter<R, F>,
}

impl<R, F> FieldAccessor<R, F> {
    pub fn new<G, S>(name: impl Into<String>, getter: G, setter: S) -> Self
    where
        G: Fn(&R) -> Option<F> + Send + Sync + 'static,
        S: Fn(&mut R, F) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            getter: Arc::new(getter),
            setter: Arc::new(setter),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get(&self, record: &R) -> Option<F> {
        (self.getter)(record)
    }

    pub fn set(&self, record: &mut R, value: F) {
        (self.setter)(record, value)
    }
}

impl<R, F> Clone for FieldAccessor<R, F> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            getter: Arc::clone(&self.getter),
            setter: Arc::clone(&self.setter),
        }
    }
}

impl<R, F> fmt::Debug for FieldAccessor<R, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldAccessor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// By-name registry of the accessors of a record type.
pub struct FieldAccessors<R> {
    accessors: HashMap<String, Box<dyn Any + Send + Sync>>,
    _record: PhantomData<fn(R)>,
}

impl<R: 'static> FieldAccessors<R> {
    pub fn new() -> Self {
        Self {
            accessors: HashMap::new(),
            _record: PhantomData,
        }
    }

    /// Register an accessor under its own name, replacing any previous one.
    pub fn register<F: 'static>(&mut self, accessor: FieldAccessor<R, F>) {
        self.accessors
            .insert(accessor.name().to_string(), Box::new(accessor));
    }

    pub fn with<F: 'static>(mut self, accessor: FieldAccessor<R, F>) -> Self {
        self.register(accessor);
        self
    }

    /// The accessor registered as `name` with field type `F`.
    pub fn get<F: 'static>(&self, name: &str) -> Result<FieldAccessor<R, F>, DedupeError> {
        self.accessors
            .get(name)
            .and_then(|accessor| accessor.downcast_ref::<FieldAccessor<R, F>>())
            .cloned()
            .ok_or_else(|| DedupeError::MissingAccessor {
                name: name.to_string(),
            })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.accessors.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.accessors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accessors.is_empty()
    }
}

impl<R: 'static> Default for FieldAccessors<R> {
    fn default() -> Self {
        Self::new()
    }
}

trait FieldMergeOp<R>: Send + Sync {
    fn tag(&self) -> Option<&ResolutionTag>;
    fn set_tag(&mut self, tag: ResolutionTag);
    fn merge_into(&self, target: &mut R, values: &[AnnotatedValue<R>], context: &mut FusionContext);
}

struct FieldMerge<R, F> {
    accessor: FieldAccessor<R, F>,
    resolutions: Vec<Box<dyn ConflictResolution<F, F>>>,
    tag: Option<ResolutionTag>,
}

impl<R, F: PartialEq + fmt::Debug> FieldMerge<R, F> {
    fn resolve(&self, mut values: Vec<AnnotatedValue<F>>, context: &mut FusionContext) -> anyhow::Result<Option<F>> {
        for resolution in &self.resolutions {
            values = resolution.resolve_partially(values, context)?;
        }
        if let Some(tag) = &self.tag {
            context.store_sources(tag, &values);
        }
        Ok(finalize(self.accessor.name(), values)?)
    }
}

impl<R, F> FieldMergeOp<R> for FieldMerge<R, F>
where
    F: PartialEq + fmt::Debug,
{
    fn tag(&self) -> Option<&ResolutionTag> {
        self.tag.as_ref()
    }

    fn set_tag(&mut self, tag: ResolutionTag) {
        self.tag = Some(tag);
    }

    fn merge_into(&self, target: &mut R, values: &[AnnotatedValue<R>], context: &mut FusionContext) {
        let field_values: Vec<AnnotatedValue<F>> = values
            .iter()
            .filter_map(|annotated| {
                self.accessor
                    .get(&annotated.value)
                    .map(|value| annotated.with_value(value))
            })
            .collect();
        let resolved = self.resolve(field_values, context);
        if let Some(Some(value)) = context.exceptions_mut().capture(resolved) {
            self.accessor.set(target, value);
        }
    }
}

type Constructor<R> = Box<dyn Fn() -> R + Send + Sync>;

/// Builds a record from a fresh base value and resolves each field in turn.
///
/// A field whose resolution fails is left as the constructor produced it;
/// the failure is captured in the context and the remaining fields still run.
pub struct Merge<R> {
    constructor: Constructor<R>,
    field_merges: Vec<Box<dyn FieldMergeOp<R>>>,
}

impl<R: 'static> Merge<R> {
    pub fn builder<C>(constructor: C) -> MergeBuilder<R>
    where
        C: Fn() -> R + Send + Sync + 'static,
    {
        MergeBuilder {
            constructor: Box::new(constructor),
            field_merges: Vec::new(),
            error: None,
        }
    }

    pub fn field_count(&self) -> usize {
        self.field_merges.len()
    }
}

impl<R> ConflictResolution<R, R> for Merge<R> {
    fn resolve_non_empty(
        &self,
        values: Vec<AnnotatedValue<R>>,
        context: &mut FusionContext,
    ) -> anyhow::Result<Vec<AnnotatedValue<R>>> {
        let mut merged = (self.constructor)();
        for field_merge in &self.field_merges {
            field_merge.merge_into(&mut merged, &values, context);
        }
        Ok(vec![AnnotatedValue::calculated(merged, &values)])
    }
}

impl<R> fmt::Debug for Merge<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Merge")
            .field("fields", &self.field_merges.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Merge`]; fields are resolved in the order they are added.
pub struct MergeBuilder<R> {
    constructor: Constructor<R>,
    field_merges: Vec<Box<dyn FieldMergeOp<R>>>,
    error: Option<DedupeError>,
}

impl<R: 'static> MergeBuilder<R> {
    /// Start the resolution chain of a field.
    pub fn field<F>(self, accessor: FieldAccessor<R, F>) -> FieldMergeBuilder<R, F>
    where
        F: PartialEq + fmt::Debug + 'static,
    {
        FieldMergeBuilder {
            merge: self,
            current: FieldMerge {
                accessor,
                resolutions: Vec::new(),
                tag: None,
            },
        }
    }

    /// Like [`field`](Self::field), looking the accessor up by name.
    pub fn field_named<F>(self, accessors: &FieldAccessors<R>, name: &str) -> Result<FieldMergeBuilder<R, F>, DedupeError>
    where
        F: PartialEq + fmt::Debug + 'static,
    {
        let accessor = accessors.get::<F>(name)?;
        Ok(self.field(accessor))
    }

    pub fn build(self) -> Result<Merge<R>, DedupeError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(Merge {
            constructor: self.constructor,
            field_merges: self.field_merges,
        })
    }
}

/// Builder for the resolution chain of one field.
pub struct FieldMergeBuilder<R, F> {
    merge: MergeBuilder<R>,
    current: FieldMerge<R, F>,
}

impl<R: 'static, F: PartialEq + fmt::Debug + 'static> FieldMergeBuilder<R, F> {
    /// Append a resolution to the chain of this field.
    pub fn with<S>(mut self, resolution: S) -> Self
    where
        S: ConflictResolution<F, F> + 'static,
    {
        self.current.resolutions.push(Box::new(resolution));
        self
    }

    /// Same as [`with`](Self::with), reads better after the first strategy.
    pub fn then<S>(self, resolution: S) -> Self
    where
        S: ConflictResolution<F, F> + 'static,
    {
        self.with(resolution)
    }

    /// Store the sources surviving this field's chain under `tag`.
    pub fn save_as(mut self, tag: ResolutionTag) -> Self {
        self.current.tag = Some(tag);
        self
    }

    /// Keep only values from the sources stored under `tag`.
    pub fn corresponding(self, tag: ResolutionTag) -> Self {
        self.with(corresponding(tag))
    }

    /// Keep only values from the sources that won the previous field,
    /// tagging that field if it was not tagged yet.
    pub fn corresponding_to_previous(mut self) -> Self {
        let position = self.merge.field_merges.len();
        let Some(previous) = self.merge.field_merges.last_mut() else {
            self.merge.error.get_or_insert(DedupeError::InvalidConfig {
                message: format!(
                    "field `{}` cannot correspond to a previous field: it is the first one",
                    self.current.accessor.name()
                ),
            });
            return self;
        };
        let tag = match previous.tag() {
            Some(tag) => tag.clone(),
            None => {
                let tag = ResolutionTag::new(format!("field-{}", position - 1));
                previous.set_tag(tag.clone());
                tag
            }
        };
        self.corresponding(tag)
    }

    /// Finish this field and start the next one.
    pub fn field<G>(self, accessor: FieldAccessor<R, G>) -> FieldMergeBuilder<R, G>
    where
        G: PartialEq + fmt::Debug + 'static,
    {
        self.finish().field(accessor)
    }

    pub fn field_named<G>(self, accessors: &FieldAccessors<R>, name: &str) -> Result<FieldMergeBuilder<R, G>, DedupeError>
    where
        G: PartialEq + fmt::Debug + 'static,
    {
        self.finish().field_named(accessors, name)
    }

    pub fn build(self) -> Result<Merge<R>, DedupeError> {
        self.finish().build()
    }

    fn finish(self) -> MergeBuilder<R> {
        let mut merge = self.merge;
        merge.field_merges.push(Box::new(self.current));
        merge
    }
}
