//! A social network model and a small query library over it

use std::rc::Rc;
use std::sync::Arc;

use trellis_foundation::{ObjectId, Result, Value};
use trellis_matchers::{Count, InputKey, ModelMetaContext, NormalizerOptions, PQuery, PQueryBuilder};
use trellis_model::{
    ClassId, DerivedFn, FeatureId, FeatureKind, GraphModel, Metamodel, ModelHandle, ResourceId,
};

pub struct Network {
    pub model: ModelHandle,
    pub res: ResourceId,
    pub person: ClassId,
    pub knows: FeatureId,
    pub mutual: FeatureId,
    pub meta: ModelMetaContext,
}

pub struct Library {
    pub knows: Rc<PQuery>,
    pub reach: Rc<PQuery>,
    pub degree: Rc<PQuery>,
    pub lonely: Rc<PQuery>,
    pub linked: Rc<PQuery>,
    pub fof: Rc<PQuery>,
}

impl Library {
    pub fn all(&self) -> Vec<Rc<PQuery>> {
        vec![
            Rc::clone(&self.knows),
            Rc::clone(&self.reach),
            Rc::clone(&self.degree),
            Rc::clone(&self.lonely),
            Rc::clone(&self.linked),
            Rc::clone(&self.fof),
        ]
    }
}

impl Network {
    pub fn new() -> Self {
        let mut b = Metamodel::builder();
        let person = b.class("Person", &[]);
        let knows = b.reference(person, "knows", person, true);
        let mutual = b.derived(
            person,
            "mutual",
            FeatureKind::Reference {
                target: person,
                containment: false,
            },
            true,
            false,
        );
        let metamodel = Arc::new(b.build().unwrap());
        let model = ModelHandle::new(Arc::clone(&metamodel));
        model.set_derived(mutual, mutual_friends(knows)).unwrap();
        let res = model.create_resource("people");
        Self {
            model,
            res,
            person,
            knows,
            mutual,
            meta: ModelMetaContext::new(metamodel),
        }
    }

    pub fn people(&self, n: usize) -> Vec<ObjectId> {
        (0..n).map(|_| self.model.create_object(self.res, self.person).unwrap()).collect()
    }

    fn binary(&self, fqn: &str, key: InputKey) -> Rc<PQuery> {
        let person = InputKey::Class(self.person);
        PQueryBuilder::new(fqn)
            .parameter("a", Some(person))
            .parameter("b", Some(person))
            .body(move |b| {
                let a = b.variable_by_name("a")?;
                let c = b.variable_by_name("b")?;
                b.type_constraint(key, &[a, c])?;
                Ok(())
            })
            .build(&self.meta, &NormalizerOptions::default())
            .unwrap()
    }

    pub fn mutual_query(&self) -> Rc<PQuery> {
        self.binary("net.mutual", InputKey::Feature(self.mutual))
    }

    pub fn library(&self) -> Library {
        let person = InputKey::Class(self.person);
        let opts = NormalizerOptions::default();
        let knows = self.binary("net.knows", InputKey::Feature(self.knows));

        let callee = Rc::clone(&knows);
        let reach = PQueryBuilder::new("net.reach")
            .parameter("a", None)
            .parameter("b", None)
            .body(move |b| {
                let a = b.variable_by_name("a")?;
                let c = b.variable_by_name("b")?;
                b.transitive_closure(&callee, a, c)?;
                Ok(())
            })
            .build(&self.meta, &opts)
            .unwrap();

        let callee = Rc::clone(&knows);
        let degree = PQueryBuilder::new("net.degree")
            .parameter("p", Some(person))
            .parameter("n", None)
            .body(move |b| {
                let p = b.variable_by_name("p")?;
                let n = b.variable_by_name("n")?;
                let other = b.new_variable("other");
                b.aggregate(Rc::new(Count), &callee, &[p, other], None, n)?;
                Ok(())
            })
            .build(&self.meta, &opts)
            .unwrap();

        let callee = Rc::clone(&knows);
        let lonely = PQueryBuilder::new("net.lonely")
            .parameter("p", Some(person))
            .body(move |b| {
                let p = b.variable_by_name("p")?;
                let other = b.new_variable("other");
                b.negative_call(&callee, &[p, other])?;
                Ok(())
            })
            .build(&self.meta, &opts)
            .unwrap();

        let key = InputKey::Feature(self.knows);
        let linked = PQueryBuilder::new("net.linked")
            .parameter("a", None)
            .parameter("b", None)
            .body(move |b| {
                let a = b.variable_by_name("a")?;
                let c = b.variable_by_name("b")?;
                b.type_constraint(key, &[a, c])?;
                Ok(())
            })
            .body(move |b| {
                let a = b.variable_by_name("a")?;
                let c = b.variable_by_name("b")?;
                b.type_constraint(key, &[c, a])?;
                Ok(())
            })
            .build(&self.meta, &opts)
            .unwrap();

        let knows_feature = self.knows;
        let fof = PQueryBuilder::new("net.fof")
            .parameter("a", None)
            .parameter("c", None)
            .body(move |b| {
                let a = b.variable_by_name("a")?;
                let c = b.variable_by_name("c")?;
                b.path(a, &[knows_feature, knows_feature], c)?;
                Ok(())
            })
            .build(&self.meta, &opts)
            .unwrap();

        Library {
            knows,
            reach,
            degree,
            lonely,
            linked,
            fof,
        }
    }
}

/// People `holder` knows who know `holder` back.
fn mutual_friends(knows: FeatureId) -> DerivedFn {
    Rc::new(move |m: &GraphModel, holder: ObjectId| -> Result<Vec<Value>> {
        let mut out = Vec::new();
        for v in m.values(holder, knows)? {
            if let Value::Object(other) = v {
                if m.values(other, knows)?.contains(&Value::Object(holder)) {
                    out.push(Value::Object(other));
                }
            }
        }
        Ok(out)
    })
}

pub fn pair(a: ObjectId, b: ObjectId) -> Vec<Value> {
    vec![Value::Object(a), Value::Object(b)]
}
