//! Per-type field tables
//!
//! A `Schema<T>` is built once per record type and lists, for each mapped
//! field, its locator and the strategy that decodes the located selection
//! into the field. Fields that are not registered are never touched.

use std::fmt;

use super::Extract;
use super::error::{DecodeError, DecodeResult};
use super::leaf::Decode;
use super::rule::{Locator, Template};
use super::selection::Selection;

type Assign<T> = Box<dyn Fn(&mut T, Selection<'_>) -> DecodeResult<()> + Send + Sync>;

enum Strategy<T> {
    /// Leaf or custom decoder (`Decode`)
    Value { locator: Locator, assign: Assign<T> },
    /// Nested record with its own schema (`Extract`)
    Record { locator: Locator, assign: Assign<T> },
    /// Repeated records discovered by probing a template until it misses
    Repeated { template: Template, push: Assign<T> },
}

struct FieldRule<T> {
    name: &'static str,
    strategy: Strategy<T>,
}

pub struct Schema<T> {
    fields: Vec<FieldRule<T>>,
}

impl<T> fmt::Debug for Schema<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.fields.iter().map(|field| field.name))
            .finish()
    }
}

impl<T: 'static> Schema<T> {
    pub fn builder() -> SchemaBuilder<T> {
        SchemaBuilder { fields: Vec::new() }
    }

    pub fn field_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.fields.iter().map(|field| field.name)
    }

    /// Populate `record` from `selection`, field by field
    pub fn apply(&self, record: &mut T, selection: Selection<'_>) -> DecodeResult<()> {
        for field in &self.fields {
            match &field.strategy {
                Strategy::Value { locator, assign } | Strategy::Record { locator, assign } => {
                    let located = locator.resolve(selection).map_err(|e| e.within(field.name))?;
                    if let Some(sub) = located {
                        assign(record, sub).map_err(|e| e.within(field.name))?;
                    }
                }
                Strategy::Repeated { template, push } => {
                    let mut taken: Vec<Selection<'_>> = Vec::new();
                    let mut index = 0;
                    loop {
                        let locator = template.locator(index).map_err(|e| e.within(field.name))?;
                        let Some(sub) = locator.resolve(selection).map_err(|e| e.within(field.name))? else {
                            break;
                        };
                        // a locator that ignores the index would otherwise repeat forever
                        if taken.iter().any(|seen| seen.same_node(&sub)) {
                            return Err(DecodeError::invalid_rule(
                                template.rule(),
                                format!("item {index} repeats an element already taken"),
                            )
                            .within(field.name));
                        }
                        push(record, sub).map_err(|e| e.within(&format!("{}[{index}]", field.name)))?;
                        taken.push(sub);
                        index += 1;
                    }
                }
            }
        }
        Ok(())
    }
}

pub struct SchemaBuilder<T> {
    fields: Vec<FieldRule<T>>,
}

impl<T: 'static> SchemaBuilder<T> {
    /// Map a leaf (or self-decoding) field
    #[must_use]
    pub fn field<F: Decode + 'static>(
        mut self,
        name: &'static str,
        rule: &str,
        access: fn(&mut T) -> &mut F,
    ) -> Self {
        self.fields.push(FieldRule {
            name,
            strategy: Strategy::Value {
                locator: Locator::parse(rule),
                assign: Box::new(move |record: &mut T, selection: Selection<'_>| {
                    *access(record) = F::decode(selection)?;
                    Ok(())
                }),
            },
        });
        self
    }

    /// Map a nested record decoded through its own schema
    #[must_use]
    pub fn nested<F: Extract>(
        mut self,
        name: &'static str,
        rule: &str,
        access: fn(&mut T) -> &mut F,
    ) -> Self {
        self.fields.push(FieldRule {
            name,
            strategy: Strategy::Record {
                locator: Locator::parse(rule),
                assign: Box::new(move |record: &mut T, selection: Selection<'_>| {
                    *access(record) = super::extract::<F>(selection)?;
                    Ok(())
                }),
            },
        });
        self
    }

    /// Map a list of records located by a template with one `{}`
    /// Repeated sub-records located by a template with one `{}`. Every rendered
    /// locator must pick a distinct element; a repeat is an `InvalidRule` error.
    #[must_use]
    pub fn list<F: Extract>(
        mut self,
        name: &'static str,
        rule: &str,
        access: fn(&mut T) -> &mut Vec<F>,
    ) -> Self {
        self.fields.push(FieldRule {
            name,
            strategy: Strategy::Repeated {
                template: Template::parse(rule),
                push: Box::new(move |record: &mut T, selection: Selection<'_>| {
                    let item = super::extract::<F>(selection)?;
                    access(record).push(item);
                    Ok(())
                }),
            },
        });
        self
    }

    pub fn build(self) -> Schema<T> {
        Schema {
            fields: self.fields,
        }
    }
}
