//! Template parameters and the values bound to them at submission time.

use serde::Serialize;

/// Declaration of one template parameter
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ParameterSpec {
    pub description: String,
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allowed_values: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_pattern: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_value: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub constraint_description: Option<String>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub no_echo: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ParameterSpec {
    pub fn new<S1, S2>(kind: S1, description: S2) -> Self
    where
        S1: Into<String>,
        S2: Into<String>,
    {
        Self {
            description: description.into(),
            kind: kind.into(),
            allowed_values: Vec::new(),
            allowed_pattern: None,
            min_length: None,
            max_length: None,
            min_value: None,
            max_value: None,
            constraint_description: None,
            no_echo: false,
            default: None,
        }
    }
}

/// A template parameter together with the value submitted for it.  The value may be missing
/// while the template is being assembled (for example an AMI that couldn't be found); the stack
/// driver refuses to submit a template with missing values.
#[derive(Debug, Clone, PartialEq)]
pub struct Arg {
    pub key: String,
    pub spec: ParameterSpec,
    pub value: Option<String>,
}

impl Arg {
    pub fn new<K, V>(key: K, value: V, spec: ParameterSpec) -> Self
    where
        K: Into<String>,
        V: Into<Option<String>>,
    {
        Self {
            key: key.into(),
            spec,
            value: value.into(),
        }
    }

    pub fn string<K, V, D>(key: K, value: V, description: D) -> Self
    where
        K: Into<String>,
        V: Into<Option<String>>,
        D: Into<String>,
    {
        Self::new(key, value, ParameterSpec::new("String", description))
    }

    /// A string parameter that is masked in the console and API output
    pub fn password<K, V, D>(key: K, value: V, description: D) -> Self
    where
        K: Into<String>,
        V: Into<Option<String>>,
        D: Into<String>,
    {
        let mut spec = ParameterSpec::new("String", description);
        spec.no_echo = true;
        spec.min_length = Some(8);
        Self::new(key, value, spec)
    }

    /// A list of subnet ids, submitted as a comma separated string
    pub fn subnets<K, D>(key: K, values: &[String], description: D) -> Self
    where
        K: Into<String>,
        D: Into<String>,
    {
        Self::new(
            key,
            values.join(","),
            ParameterSpec::new("List<AWS::EC2::Subnet::Id>", description),
        )
    }

    pub fn keypair<K, V, D>(key: K, value: V, description: D) -> Self
    where
        K: Into<String>,
        V: Into<Option<String>>,
        D: Into<String>,
    {
        Self::new(
            key,
            value,
            ParameterSpec::new("AWS::EC2::KeyPair::KeyName", description),
        )
    }

    pub fn ami<K, V, D>(key: K, value: V, description: D) -> Self
    where
        K: Into<String>,
        V: Into<Option<String>>,
        D: Into<String>,
    {
        Self::new(key, value, ParameterSpec::new("AWS::EC2::Image::Id", description))
    }

    pub fn certificate<K, V, D>(key: K, value: V, description: D) -> Self
    where
        K: Into<String>,
        V: Into<Option<String>>,
        D: Into<String>,
    {
        let mut spec = ParameterSpec::new("String", description);
        spec.allowed_pattern = Some("arn:aws:acm:.*".to_string());
        Self::new(key, value, spec)
    }
}

#[cfg(test)]
mod test {
    use super::Arg;
    use serde_json::json;

    #[test]
    fn password_is_masked() {
        let arg = Arg::password("DbPassword", "hunter22".to_string(), "Database password");
        assert_eq!(
            serde_json::to_value(&arg.spec).unwrap(),
            json!({
                "Description": "Database password",
                "Type": "String",
                "MinLength": 8,
                "NoEcho": true,
            })
        );
    }

    #[test]
    fn missing_values_are_kept() {
        let arg = Arg::ami("VaultAmi", None::<String>, "Vault AMI");
        assert_eq!(arg.value, None);
        assert_eq!(arg.spec.kind, "AWS::EC2::Image::Id");
    }

    #[test]
    fn subnets_are_joined() {
        let arg = Arg::subnets(
            "Subnets",
            &["subnet-1".to_string(), "subnet-2".to_string()],
            "Subnets",
        );
        assert_eq!(arg.value.as_deref(), Some("subnet-1,subnet-2"));
    }
}
