use indexmap::IndexMap;

use crate::{
    manifest::{Job, JobInstance, JobLink, PropertyValue},
    release_spec::ReleaseSpec,
    template::eval::Value,
};

/// Everything a template can see while being rendered for one instance of a
/// job.
#[derive(Clone, Copy, Debug)]
pub struct Context<'a> {
    pub deployment: &'a str,
    pub instance_group: &'a str,
    pub job: &'a Job,
    pub spec: &'a ReleaseSpec,

    /// [`None`] for jobs without instances. `spec.address` and friends are
    /// nil in that case.
    pub instance: Option<&'a JobInstance>,
}

impl<'a> Context<'a> {
    pub fn property(&self, name: &str) -> Option<&'a PropertyValue> {
        self.spec.resolve_property(self.job, name)
    }

    pub fn link(&self, name: &str) -> Option<&'a JobLink> {
        self.job.containerization().consumes.get(name)
    }

    /// The value bound to `spec`.
    pub fn spec_value(&self) -> Value<'a> {
        let mut spec = IndexMap::new();
        let instance = self.instance;

        let string = |value: Option<&str>| value.map_or(Value::Nil, |value| Value::Str(value.to_owned()));
        spec.insert("address".to_owned(), string(instance.map(|i| i.address.as_str())));
        spec.insert("ip".to_owned(), string(instance.map(|i| i.address.as_str())));
        spec.insert("az".to_owned(), string(instance.map(|i| i.az.as_str())));
        spec.insert("id".to_owned(), string(instance.map(|i| i.id.as_str())));
        spec.insert(
            "index".to_owned(),
            instance.map_or(Value::Nil, |i| Value::Int(i.index as i64)),
        );
        spec.insert(
            "bootstrap".to_owned(),
            instance.map_or(Value::Nil, |i| Value::Bool(i.bootstrap)),
        );
        spec.insert("deployment".to_owned(), Value::Str(self.deployment.to_owned()));
        spec.insert("name".to_owned(), Value::Str(self.instance_group.to_owned()));
        spec.insert(
            "job".to_owned(),
            Value::Map(IndexMap::from([(
                "name".to_owned(),
                Value::Str(self.job.name.clone()),
            )])),
        );
        spec.insert(
            "release".to_owned(),
            Value::Map(IndexMap::from([(
                "name".to_owned(),
                Value::Str(self.job.release.clone()),
            )])),
        );

        Value::Map(spec)
    }
}

/// The value a link instance is exposed as, `link("x").instances[0]`.
pub fn instance_value(instance: &JobInstance) -> Value<'static> {
    Value::Map(IndexMap::from([
        ("address".to_owned(), Value::Str(instance.address.clone())),
        ("az".to_owned(), Value::Str(instance.az.clone())),
        ("bootstrap".to_owned(), Value::Bool(instance.bootstrap)),
        ("id".to_owned(), Value::Str(instance.id.clone())),
        ("index".to_owned(), Value::Int(instance.index as i64)),
        ("name".to_owned(), Value::Str(instance.name.clone())),
    ]))
}
