//! Conversions between visitor constants and model constant descriptors.

use crate::desc::{
    ClassDesc, ConstantDesc, DirectMethodHandleDesc, DynamicCallSiteDesc, DynamicConstantDesc,
    MethodHandleKind,
};
use crate::error::{Error, Result};
use crate::types::{Constant, ConstantDynamic, Handle, Type};

pub fn to_model_handle(handle: &Handle) -> Result<DirectMethodHandleDesc> {
    let kind = MethodHandleKind::from_ref_kind(handle.tag, handle.is_interface).ok_or_else(|| {
        Error::unsupported_constant(format!(
            "method handle tag {} for {}.{}",
            handle.tag, handle.owner, handle.name
        ))
    })?;
    Ok(DirectMethodHandleDesc {
        kind,
        owner: ClassDesc::of_internal_name(&handle.owner),
        name: handle.name.clone(),
        descriptor: handle.descriptor.clone(),
    })
}

pub fn to_visitor_handle(handle: &DirectMethodHandleDesc) -> Handle {
    Handle::new(
        handle.kind.ref_kind(),
        handle.owner.internal_name(),
        handle.name.clone(),
        handle.descriptor.clone(),
        handle.kind.is_interface(),
    )
}

pub fn to_model_constant(constant: &Constant) -> Result<ConstantDesc> {
    let desc = match constant {
        Constant::Integer(value) => ConstantDesc::Int(*value),
        Constant::Float(value) => ConstantDesc::Float(*value),
        Constant::Long(value) => ConstantDesc::Long(*value),
        Constant::Double(value) => ConstantDesc::Double(*value),
        Constant::String(value) => ConstantDesc::String(value.clone()),
        Constant::Type(ty) if ty.is_method() => {
            ConstantDesc::MethodType(ty.descriptor().to_string())
        }
        Constant::Type(ty) if ty.descriptor().starts_with(|c| c == 'L' || c == '[') => {
            ConstantDesc::Class(ClassDesc::of_descriptor(ty.descriptor()))
        }
        Constant::Type(ty) => {
            return Err(Error::unsupported_constant(format!(
                "primitive type {} is not a loadable constant",
                ty.descriptor()
            )))
        }
        Constant::Handle(handle) => ConstantDesc::MethodHandle(to_model_handle(handle)?),
        Constant::Dynamic(dynamic) => ConstantDesc::Dynamic(Box::new(DynamicConstantDesc {
            bootstrap: to_model_handle(&dynamic.bootstrap_method)?,
            name: dynamic.name.clone(),
            ty: ClassDesc::of_descriptor(&dynamic.descriptor),
            args: to_model_constants(&dynamic.bootstrap_arguments)?,
        })),
    };
    Ok(desc)
}

pub fn to_model_constants(constants: &[Constant]) -> Result<Vec<ConstantDesc>> {
    constants.iter().map(to_model_constant).collect()
}

pub fn to_visitor_constant(constant: &ConstantDesc) -> Constant {
    match constant {
        ConstantDesc::Int(value) => Constant::Integer(*value),
        ConstantDesc::Long(value) => Constant::Long(*value),
        ConstantDesc::Float(value) => Constant::Float(*value),
        ConstantDesc::Double(value) => Constant::Double(*value),
        ConstantDesc::String(value) => Constant::String(value.clone()),
        ConstantDesc::Class(class) => Constant::Type(Type::from_descriptor(class.descriptor())),
        ConstantDesc::MethodType(descriptor) => {
            Constant::Type(Type::method_type(descriptor.clone()))
        }
        ConstantDesc::MethodHandle(handle) => Constant::Handle(to_visitor_handle(handle)),
        ConstantDesc::Dynamic(dynamic) => Constant::Dynamic(Box::new(ConstantDynamic {
            name: dynamic.name.clone(),
            descriptor: dynamic.ty.descriptor().to_string(),
            bootstrap_method: to_visitor_handle(&dynamic.bootstrap),
            bootstrap_arguments: to_visitor_constants(&dynamic.args),
        })),
    }
}

pub fn to_visitor_constants(constants: &[ConstantDesc]) -> Vec<Constant> {
    constants.iter().map(to_visitor_constant).collect()
}

/// The `invokedynamic` call site of a visitor instruction.
pub fn to_model_call_site(
    name: &str,
    descriptor: &str,
    bootstrap_method: &Handle,
    bootstrap_arguments: &[Constant],
) -> Result<DynamicCallSiteDesc> {
    Ok(DynamicCallSiteDesc {
        bootstrap: to_model_handle(bootstrap_method)?,
        name: name.to_string(),
        descriptor: descriptor.to_string(),
        args: to_model_constants(bootstrap_arguments)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{H_INVOKEINTERFACE, H_INVOKESTATIC};
    use pretty_assertions::assert_eq;

    fn bootstrap() -> Handle {
        Handle::new(
            H_INVOKESTATIC,
            "java/lang/invoke/ConstantBootstraps",
            "invoke",
            "(Ljava/lang/invoke/MethodHandles$Lookup;Ljava/lang/String;Ljava/lang/Class;\
             Ljava/lang/invoke/MethodHandle;[Ljava/lang/Object;)Ljava/lang/Object;",
            false,
        )
    }

    #[test]
    fn dynamic_constants_convert_recursively() {
        let constant = Constant::Dynamic(Box::new(ConstantDynamic {
            name: "answer".to_string(),
            descriptor: "J".to_string(),
            bootstrap_method: bootstrap(),
            bootstrap_arguments: vec![
                Constant::Type(Type::object_type("[I")),
                Constant::Type(Type::method_type("()V")),
                Constant::Handle(Handle::new(
                    H_INVOKEINTERFACE,
                    "java/util/List",
                    "size",
                    "()I",
                    true,
                )),
                Constant::Long(42),
            ],
        }));
        let model = to_model_constant(&constant).unwrap();
        let ConstantDesc::Dynamic(dynamic) = &model else {
            panic!("expected a dynamic constant, got {model:?}");
        };
        assert_eq!(dynamic.ty, ClassDesc::of_descriptor("J"));
        assert_eq!(dynamic.args[0], ConstantDesc::Class(ClassDesc::of_internal_name("[I")));
        assert_eq!(dynamic.args[2], ConstantDesc::MethodHandle(DirectMethodHandleDesc {
            kind: MethodHandleKind::InterfaceVirtual,
            owner: ClassDesc::of_internal_name("java/util/List"),
            name: "size".to_string(),
            descriptor: "()I".to_string(),
        }));
        assert!(model.is_wide());
        assert_eq!(to_visitor_constant(&model), constant);
    }

    #[test]
    fn class_constants_keep_internal_names() {
        let constant = Constant::Type(Type::object_type("java/lang/String"));
        let model = to_model_constant(&constant).unwrap();
        assert_eq!(model, ConstantDesc::Class(ClassDesc::of_internal_name("java/lang/String")));
        assert_eq!(to_visitor_constant(&model), constant);
    }

    #[test]
    fn unknown_handle_tags_are_unsupported() {
        let handle = Handle::new(10, "demo/Owner", "m", "()V", false);
        assert!(matches!(to_model_handle(&handle), Err(Error::UnsupportedConstant(_))));
        let primitive = Constant::Type(Type::from_descriptor("I"));
        assert!(matches!(to_model_constant(&primitive), Err(Error::UnsupportedConstant(_))));
    }
}
