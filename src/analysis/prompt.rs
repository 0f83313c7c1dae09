// 该文件是 Xiangjian （箱检） 项目的一部分。
// src/analysis/prompt.rs - 合规分析提示词
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

pub const SYSTEM_PROMPT: &str = "You are a package compliance analyst. \
Analyze delivery package images for retail branding compliance.";

pub const COMPLIANCE_PROMPT: &str = r#"Analyze this delivery package image for compliance with the following rules:
1. Packages should not have visible retail branding (like Walmart, Target, Amazon, etc.)
2. Packaging tape should not have visible retail branding

For any non-compliance:
1. Provide a compliance score from 0-100 (100 being fully compliant)
2. Identify what makes it non-compliant (box, tape, or both)
3. Describe the specific violations
4. Provide bounding box coordinates [x1, y1, x2, y2] around each violation
   (coordinates should be normalized from 0-1 as ratios of image dimensions)

Format your response as a JSON object with these fields:
{
    "compliance_score": int,
    "is_compliant": boolean,
    "violations": [
        {
            "type": "box|tape",
            "description": "string",
            "brand_detected": "string",
            "bounding_box": [x1, y1, x2, y2]
        }
    ],
    "summary": "string"
}

Return ONLY the JSON object, nothing else."#;
