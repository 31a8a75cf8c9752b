use calm_form::model::{FieldLens, FormModel};

#[derive(Clone, calm_form::model::FormModel)]
struct DemoForm {
    email: String,
    #[form(rename = "fullName")]
    full_name: String,
}

fn main() {
    let fields = DemoForm::fields();
    let lens = fields.email();
    let mut model = DemoForm {
        email: "a@calm.form".to_string(),
        full_name: "Ada".to_string(),
    };
    lens.set(&mut model, "b@calm.form".to_string());
    assert_eq!(lens.key().as_str(), "email");
    assert_eq!(lens.get(&model), "b@calm.form");
    assert_eq!(fields.full_name().key().as_str(), "fullName");
    assert_eq!(DemoForm::field_keys().len(), 2);
}
