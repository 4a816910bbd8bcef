//! Shared social network fixture

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use trellis_foundation::{ObjectId, ValueKind};
use trellis_matchers::{InputKey, ModelMetaContext, NormalizerOptions, PQuery, PQueryBuilder};
use trellis_model::{ClassId, FeatureId, Metamodel, ModelHandle, ResourceId};
use trellis_runtime::{Match, MatchUpdateListener};

pub struct Social {
    pub model: ModelHandle,
    pub res: ResourceId,
    pub person: ClassId,
    pub knows: FeatureId,
    pub age: FeatureId,
    pub meta: ModelMetaContext,
}

impl Social {
    pub fn new() -> Self {
        let mut b = Metamodel::builder();
        let person = b.class("Person", &[]);
        let int = b.data_type("Int", ValueKind::Int);
        let knows = b.reference(person, "knows", person, true);
        let age = b.attribute(person, "age", int, false);
        let metamodel = Arc::new(b.build().unwrap());
        let model = ModelHandle::new(Arc::clone(&metamodel));
        let res = model.create_resource("people");
        Self {
            model,
            res,
            person,
            knows,
            age,
            meta: ModelMetaContext::new(metamodel),
        }
    }

    pub fn person(&self) -> ObjectId {
        self.model.create_object(self.res, self.person).unwrap()
    }

    pub fn knows_query(&self) -> Rc<PQuery> {
        let (person, knows) = (self.person, self.knows);
        PQueryBuilder::new("social.knows")
            .parameter("a", Some(InputKey::Class(person)))
            .parameter("b", Some(InputKey::Class(person)))
            .body(move |b| {
                let a = b.variable_by_name("a")?;
                let c = b.variable_by_name("b")?;
                b.type_constraint(InputKey::Feature(knows), &[a, c])?;
                Ok(())
            })
            .build(&self.meta, &NormalizerOptions::default())
            .unwrap()
    }

    pub fn age_query(&self) -> Rc<PQuery> {
        let age = self.age;
        PQueryBuilder::new("social.age")
            .parameter("p", None)
            .parameter("years", None)
            .body(move |b| {
                let p = b.variable_by_name("p")?;
                let years = b.variable_by_name("years")?;
                b.type_constraint(InputKey::Feature(age), &[p, years])?;
                Ok(())
            })
            .build(&self.meta, &NormalizerOptions::default())
            .unwrap()
    }
}

/// Records match events as `+tuple` and `-tuple` lines.
#[derive(Default)]
pub struct Events(pub RefCell<Vec<String>>);

impl Events {
    pub fn take(&self) -> Vec<String> {
        self.0.borrow_mut().drain(..).collect()
    }
}

impl MatchUpdateListener for Events {
    fn appeared(&self, m: &Match) {
        self.0.borrow_mut().push(format!("+{}", m.to_tuple()));
    }

    fn disappeared(&self, m: &Match) {
        self.0.borrow_mut().push(format!("-{}", m.to_tuple()));
    }
}
